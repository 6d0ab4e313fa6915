// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mirror health tracking.
//
// Every attempt against a mirror folds into its running statistics. The
// resolver reads these back to recommend (and optionally prefer) the mirror
// most likely to answer quickly.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Running statistics for one mirror URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorHealth {
    pub attempts: u32,
    pub successes: u32,
    /// `successes / attempts`, 0.0 before the first attempt.
    pub success_rate: f64,
    /// Mean latency of successful attempts.
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MirrorHealth {
    fn refresh_rate(&mut self) {
        self.success_rate = if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.attempts)
        };
    }
}

/// Health for every mirror the resolver has touched, keyed by URL.
#[derive(Debug, Default)]
pub struct HealthTracker {
    mirrors: HashMap<String, MirrorHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt and fold its latency into the mean.
    pub fn record_success(&mut self, url: &str, latency: Duration) {
        let health = self.mirrors.entry(url.to_string()).or_default();

        let latency_ms = latency.as_secs_f64() * 1000.0;
        health.attempts += 1;
        health.successes += 1;
        health.avg_latency_ms += (latency_ms - health.avg_latency_ms) / f64::from(health.successes);
        health.consecutive_failures = 0;
        health.last_success = Some(Utc::now());
        health.last_error = None;
        health.refresh_rate();

        debug!(mirror = url, latency_ms, rate = health.success_rate, "mirror success recorded");
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, url: &str, error: &str) {
        let health = self.mirrors.entry(url.to_string()).or_default();

        health.attempts += 1;
        health.consecutive_failures += 1;
        health.last_error = Some(error.to_string());
        health.refresh_rate();

        warn!(
            mirror = url,
            failures = health.consecutive_failures,
            error,
            "mirror attempt failed"
        );
    }

    pub fn get(&self, url: &str) -> Option<&MirrorHealth> {
        self.mirrors.get(url)
    }

    /// Score each mirror: `0.7 × success_rate + 0.3 × latency_score`.
    ///
    /// `latency_score = 1 − avg / max_avg` over the given mirrors that have
    /// latency data (1.0 when none do). Mirrors never attempted score 1.0.
    pub fn score(&self, mirrors: &[String]) -> Vec<(String, f64)> {
        let max_avg = mirrors
            .iter()
            .filter_map(|url| self.mirrors.get(url))
            .filter(|h| h.successes > 0)
            .map(|h| h.avg_latency_ms)
            .fold(0.0_f64, f64::max);

        mirrors
            .iter()
            .map(|url| {
                let score = match self.mirrors.get(url) {
                    None => 1.0,
                    Some(h) if h.attempts == 0 => 1.0,
                    Some(h) => {
                        let latency_score = if h.successes > 0 && max_avg > 0.0 {
                            1.0 - h.avg_latency_ms / max_avg
                        } else {
                            1.0
                        };
                        0.7 * h.success_rate + 0.3 * latency_score
                    }
                };
                (url.clone(), score)
            })
            .collect()
    }

    /// Mirrors ordered best-first. Ties keep declaration order.
    pub fn rank(&self, mirrors: &[String]) -> Vec<String> {
        let mut scored = self.score(mirrors);
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.into_iter().map(|(url, _)| url).collect()
    }

    /// The single best mirror, if any are declared.
    pub fn recommended(&self, mirrors: &[String]) -> Option<String> {
        self.rank(mirrors).into_iter().next()
    }
}
