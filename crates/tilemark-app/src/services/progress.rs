// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded progress stream. Intermediate events are dropped when the
// consumer falls behind; the terminal event always waits for room.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub current: u32,
    pub total: u32,
    pub message: String,
    /// Set only on the last event of a run.
    pub terminal: bool,
}

pub type ProgressReceiver = mpsc::Receiver<ProgressEvent>;

#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    dropped: Arc<AtomicU64>,
}

/// A progress stream holding at most `capacity` undelivered events.
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl ProgressSender {
    /// Offer an intermediate event. Returns `false` if it was not delivered.
    pub fn report(&self, current: u32, total: u32, message: impl Into<String>) -> bool {
        let event = ProgressEvent {
            current,
            total,
            message: message.into(),
            terminal: false,
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(current = event.current, "progress event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver the terminal event, waiting for the consumer if needed.
    pub async fn finish(&self, total: u32, message: impl Into<String>) {
        let event = ProgressEvent {
            current: total,
            total,
            message: message.into(),
            terminal: true,
        };
        // A closed receiver has nobody left to tell.
        let _ = self.tx.send(event).await;
    }

    /// Intermediate events lost to a full channel so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_consumer_loses_steps_but_not_the_end() {
        let (tx, mut rx) = progress_channel(1);
        assert!(tx.report(1, 3, "resolving"));
        assert!(!tx.report(2, 3, "converting"));

        let finisher = tokio::spawn({
            let tx = tx.clone();
            async move { tx.finish(3, "done").await }
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message, "resolving");
        assert!(!first.terminal);

        let last = rx.recv().await.unwrap();
        assert!(last.terminal);
        assert_eq!((last.current, last.total), (3, 3));

        finisher.await.unwrap();
        assert_eq!(tx.dropped(), 1);
    }

    #[tokio::test]
    async fn closed_receiver_is_harmless() {
        let (tx, rx) = progress_channel(4);
        drop(rx);
        assert!(!tx.report(1, 2, "late"));
        tx.finish(2, "done").await;
        assert_eq!(tx.dropped(), 0);
    }
}
