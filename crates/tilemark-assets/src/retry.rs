// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-mirror retry policy with linear backoff.
//
// Errors are classified into Transient (retry the same mirror) and Permanent
// (move straight to the next mirror). Only transient errors consume retries.

use std::time::Duration;

use tilemark_core::config::ResolverConfig;
use tilemark_core::error::TilemarkError;
use tilemark_core::types::{AssetDescriptor, ErrorClass};
use tracing::debug;

/// Retry budget for one mirror of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per mirror, always at least one.
    pub attempts: u32,
    /// Backoff unit.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn for_asset(descriptor: &AssetDescriptor, config: &ResolverConfig) -> Self {
        Self {
            attempts: descriptor.retry_attempts.max(1),
            base_delay: config.base_backoff(),
            max_delay: config.max_backoff(),
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    ///
    /// delay = min(base * attempt, max_delay)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try the same mirror again after this delay.
    RetryAfter(Duration),
    /// This mirror cannot succeed; move to the next one.
    GiveUp(ErrorClass),
    /// Attempts on this mirror used up.
    Exhausted,
}

/// Classify a failure for retry decisions.
pub fn classify_error(err: &TilemarkError) -> ErrorClass {
    match err {
        TilemarkError::Fetch(_) | TilemarkError::Timeout(_) => ErrorClass::Transient,
        TilemarkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        },
        // Link failures: a payload that loads but does not export the right
        // symbol will not change on refetch.
        _ => ErrorClass::Permanent,
    }
}

/// Decide whether to retry the same mirror.
pub fn should_retry(err: &TilemarkError, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => RetryDecision::GiveUp(ErrorClass::Permanent),
        ErrorClass::Transient if attempt >= policy.attempts => RetryDecision::Exhausted,
        ErrorClass::Transient => {
            let delay = policy.backoff(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
            RetryDecision::RetryAfter(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(4), Duration::from_millis(350));
    }

    #[test]
    fn zero_retry_budget_still_attempts_once() {
        let descriptor = AssetDescriptor::new("codec", "Codec").with_retry_attempts(0);
        let policy = RetryPolicy::for_asset(&descriptor, &ResolverConfig::default());
        assert_eq!(policy.attempts, 1);
    }

    #[test]
    fn timeout_is_transient() {
        assert_eq!(classify_error(&TilemarkError::Timeout(100)), ErrorClass::Transient);
    }

    #[test]
    fn link_failure_moves_to_next_mirror() {
        let err = TilemarkError::AssetUnavailable {
            name: "codec".into(),
            reason: "SYMBOL_MISSING: Codec".into(),
        };
        assert_eq!(
            should_retry(&err, 1, &RetryPolicy::default()),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        );
    }

    #[test]
    fn transient_exhausts_after_budget() {
        let policy = RetryPolicy::default();
        let err = TilemarkError::Fetch("connection reset".into());
        assert!(matches!(
            should_retry(&err, 1, &policy),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(should_retry(&err, 2, &policy), RetryDecision::Exhausted);
    }
}
