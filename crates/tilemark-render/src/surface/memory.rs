// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Byte accounting and eviction planning for pooled surfaces.
//
// Usage is `width × height × 4` per live surface. Crossing the high-water
// mark plans an eviction of idle surfaces, highest score first, until usage
// is back at or under the low-water mark.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use super::SurfaceId;

pub const BYTES_PER_PIXEL: u64 = 4;

/// Tracked bytes for a `width × height` RGBA surface.
pub fn surface_bytes(width: u32, height: u32) -> u64 {
    u64::from(width)
        .saturating_mul(u64::from(height))
        .saturating_mul(BYTES_PER_PIXEL)
}

/// Eviction priority; higher is evicted first.
///
/// `0.4 × size_mb + 0.4 × idle_minutes + 0.2 × (1 / access_count)`
pub fn eviction_score(bytes: u64, idle: Duration, access_count: u32) -> f64 {
    let size_mb = bytes as f64 / (1024.0 * 1024.0);
    let idle_minutes = idle.as_secs_f64() / 60.0;
    let rarity = 1.0 / f64::from(access_count.max(1));
    0.4 * size_mb + 0.4 * idle_minutes + 0.2 * rarity
}

/// An idle surface offered for eviction.
#[derive(Debug, Clone, Copy)]
pub struct EvictionCandidate {
    pub id: SurfaceId,
    pub bytes: u64,
    pub idle: Duration,
    pub access_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub budget: u64,
    pub used: u64,
    pub tracked_surfaces: usize,
    pub evictions: u64,
}

/// Tracks bytes per surface against a budget.
#[derive(Debug)]
pub struct MemoryManager {
    budget: u64,
    high_water: f64,
    low_water: f64,
    tracked: HashMap<SurfaceId, u64>,
    used: u64,
    evictions: u64,
}

impl MemoryManager {
    pub fn new(budget: u64, high_water: f64, low_water: f64) -> Self {
        Self {
            budget,
            high_water,
            low_water,
            tracked: HashMap::new(),
            used: 0,
            evictions: 0,
        }
    }

    /// Start (or update) tracking a surface.
    pub fn track(&mut self, id: SurfaceId, bytes: u64) {
        let previous = self.tracked.insert(id, bytes).unwrap_or(0);
        self.used = self.used.saturating_sub(previous).saturating_add(bytes);
    }

    pub fn untrack(&mut self, id: SurfaceId) {
        if let Some(bytes) = self.tracked.remove(&id) {
            self.used = self.used.saturating_sub(bytes);
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn high_mark(&self) -> f64 {
        self.budget as f64 * self.high_water
    }

    fn low_mark(&self) -> f64 {
        self.budget as f64 * self.low_water
    }

    /// True once usage reaches the high-water mark.
    pub fn under_pressure(&self) -> bool {
        self.budget > 0 && self.used as f64 >= self.high_mark()
    }

    /// Pick idle surfaces to dispose, best candidates first, stopping once
    /// usage would be at or below the low-water mark. Empty when not under
    /// pressure.
    pub fn plan_eviction(&self, candidates: &[EvictionCandidate]) -> Vec<SurfaceId> {
        if !self.under_pressure() {
            return Vec::new();
        }

        let mut ranked: Vec<(f64, &EvictionCandidate)> = candidates
            .iter()
            .map(|c| (eviction_score(c.bytes, c.idle, c.access_count), c))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let target = self.low_mark();
        let mut projected = self.used;
        let mut chosen = Vec::new();
        for (_, candidate) in ranked {
            if projected as f64 <= target {
                break;
            }
            projected = projected.saturating_sub(candidate.bytes);
            chosen.push(candidate.id);
        }
        chosen
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions = self.evictions.saturating_add(count as u64);
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            budget: self.budget,
            used: self.used,
            tracked_surfaces: self.tracked.len(),
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, bytes: u64, idle_secs: u64, access_count: u32) -> EvictionCandidate {
        EvictionCandidate {
            id: SurfaceId(id),
            bytes,
            idle: Duration::from_secs(idle_secs),
            access_count,
        }
    }

    #[test]
    fn score_weights() {
        let mb = 1024 * 1024;
        // 2 MB, 3 minutes idle, accessed 4 times: 0.8 + 1.2 + 0.05
        let score = eviction_score(2 * mb, Duration::from_secs(180), 4);
        assert!((score - 2.05).abs() < 1e-9);
        // Never-accessed surfaces count as one access.
        assert_eq!(eviction_score(0, Duration::ZERO, 0), 0.2);
    }

    #[test]
    fn tracking_adds_and_replaces() {
        let mut mm = MemoryManager::new(1000, 0.8, 0.6);
        mm.track(SurfaceId(1), 100);
        mm.track(SurfaceId(2), 200);
        mm.track(SurfaceId(1), 50);
        assert_eq!(mm.used(), 250);
        mm.untrack(SurfaceId(2));
        assert_eq!(mm.used(), 50);
    }

    #[test]
    fn no_plan_below_high_water() {
        let mut mm = MemoryManager::new(1000, 0.8, 0.6);
        mm.track(SurfaceId(1), 700);
        assert!(mm.plan_eviction(&[candidate(1, 700, 60, 1)]).is_empty());
    }

    #[test]
    fn plan_reaches_low_water_by_score() {
        let mut mm = MemoryManager::new(1000, 0.8, 0.6);
        for (id, bytes) in [(1, 300), (2, 300), (3, 300)] {
            mm.track(SurfaceId(id), bytes);
        }
        assert!(mm.under_pressure());

        let plan = mm.plan_eviction(&[
            candidate(1, 300, 10, 9),
            candidate(2, 300, 600, 1),
            candidate(3, 300, 30, 2),
        ]);
        // 900 -> 600 after evicting the longest-idle surface.
        assert_eq!(plan, vec![SurfaceId(2)]);
    }
}
