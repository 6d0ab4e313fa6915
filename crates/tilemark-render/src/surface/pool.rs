// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded pool of reusable raster surfaces.
//
// `acquire` hands out a `SurfaceLease` that owns the pixmap until it comes
// back through `release`. The pool keeps a slot per live surface, so a lease
// that is never returned stays counted against capacity and shows up in
// `stats().in_use`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tilemark_core::config::PoolConfig;
use tilemark_core::error::{Result, TilemarkError};
use tiny_skia::{Color, Pixmap, Transform};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::SurfaceId;
use super::memory::{EvictionCandidate, MemoryManager, surface_bytes};

/// Reuse window: an idle surface qualifies when the larger of the two areas
/// is at most this multiple of the smaller.
const REUSE_AREA_RATIO: f64 = 2.0;

/// A borrowed surface. Return it with [`SurfacePool::release`].
#[derive(Debug)]
pub struct SurfaceLease {
    id: SurfaceId,
    pixmap: Pixmap,
    /// Transform applied by drawing code; reset on release.
    pub transform: Transform,
    /// Global alpha applied by drawing code; reset on release.
    pub alpha: f32,
}

impl SurfaceLease {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }
}

#[derive(Debug)]
struct Slot {
    width: u32,
    height: u32,
    in_use: bool,
    last_access: Instant,
    access_count: u32,
    /// `None` while leased out.
    pixmap: Option<Pixmap>,
}

impl Slot {
    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub bytes: u64,
    pub allocations: u64,
    pub reuses: u64,
    pub evictions: u64,
    pub disposed_on_release: u64,
}

/// Bounded allocator for drawing surfaces.
#[derive(Debug)]
pub struct SurfacePool {
    config: PoolConfig,
    slots: HashMap<SurfaceId, Slot>,
    next_id: u64,
    memory: MemoryManager,
    stats: PoolStats,
}

pub type SharedPool = Arc<Mutex<SurfacePool>>;

impl SurfacePool {
    pub fn new(config: PoolConfig) -> Self {
        let memory = MemoryManager::new(
            config.memory_budget_bytes,
            config.high_water,
            config.low_water,
        );
        Self {
            config,
            slots: HashMap::new(),
            next_id: 0,
            memory,
            stats: PoolStats::default(),
        }
    }

    pub fn shared(config: PoolConfig) -> SharedPool {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn capacity(&self) -> usize {
        self.config.max_pool_size
    }

    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Borrow a cleared `width × height` surface.
    ///
    /// Reuses an idle surface of similar area when one exists. At capacity
    /// the least recently used idle surface is disposed to make room;
    /// `PoolExhausted` only when every live surface is leased.
    #[instrument(skip(self))]
    pub fn acquire(&mut self, width: u32, height: u32) -> Result<SurfaceLease> {
        if width == 0 || height == 0 {
            return Err(TilemarkError::RenderError(format!(
                "cannot allocate a {width}x{height} surface"
            )));
        }

        let lease = match self.reuse_candidate(width, height) {
            Some(id) => self.reuse(id, width, height)?,
            None => {
                if self.slots.len() >= self.config.max_pool_size {
                    self.evict_lru_idle()?;
                }
                self.allocate(width, height)?
            }
        };

        self.enforce_budget();
        Ok(lease)
    }

    fn reuse_candidate(&self, width: u32, height: u32) -> Option<SurfaceId> {
        let wanted = u64::from(width) * u64::from(height);
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.in_use)
            .filter_map(|(id, slot)| {
                let (small, large) = if slot.area() < wanted {
                    (slot.area(), wanted)
                } else {
                    (wanted, slot.area())
                };
                let ratio = large as f64 / small.max(1) as f64;
                (ratio <= REUSE_AREA_RATIO).then_some((ratio, *id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    fn reuse(&mut self, id: SurfaceId, width: u32, height: u32) -> Result<SurfaceLease> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or_else(|| TilemarkError::RenderError(format!("{id} vanished from pool")))?;

        let mut pixmap = match slot.pixmap.take() {
            Some(p) if p.width() == width && p.height() == height => p,
            _ => new_pixmap(width, height)?,
        };
        pixmap.fill(Color::TRANSPARENT);

        slot.width = width;
        slot.height = height;
        slot.in_use = true;
        slot.last_access = Instant::now();
        slot.access_count = slot.access_count.saturating_add(1);

        self.memory.track(id, surface_bytes(width, height));
        self.stats.reuses = self.stats.reuses.saturating_add(1);
        debug!(%id, width, height, "surface reused");

        Ok(SurfaceLease {
            id,
            pixmap,
            transform: Transform::identity(),
            alpha: 1.0,
        })
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<SurfaceLease> {
        let pixmap = new_pixmap(width, height)?;
        let id = SurfaceId(self.next_id);
        self.next_id += 1;

        self.slots.insert(
            id,
            Slot {
                width,
                height,
                in_use: true,
                last_access: Instant::now(),
                access_count: 1,
                pixmap: None,
            },
        );
        self.memory.track(id, surface_bytes(width, height));
        self.stats.allocations = self.stats.allocations.saturating_add(1);
        debug!(%id, width, height, live = self.slots.len(), "surface allocated");

        Ok(SurfaceLease {
            id,
            pixmap,
            transform: Transform::identity(),
            alpha: 1.0,
        })
    }

    fn evict_lru_idle(&mut self) -> Result<()> {
        let victim = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.in_use)
            .min_by_key(|(id, slot)| (slot.last_access, **id))
            .map(|(id, _)| *id);

        match victim {
            Some(id) => {
                self.dispose(id);
                self.stats.evictions = self.stats.evictions.saturating_add(1);
                debug!(%id, "evicted least recently used idle surface");
                Ok(())
            }
            None => {
                warn!(capacity = self.config.max_pool_size, "surface pool exhausted");
                Err(TilemarkError::PoolExhausted {
                    capacity: self.config.max_pool_size,
                })
            }
        }
    }

    /// Return a leased surface. It is cleared and kept for reuse while the
    /// idle set is below `max_idle`, otherwise disposed.
    pub fn release(&mut self, lease: SurfaceLease) {
        let SurfaceLease { id, mut pixmap, .. } = lease;

        let idle = self.idle_count();
        let Some(slot) = self.slots.get_mut(&id) else {
            debug!(%id, "released surface no longer pooled; dropping");
            return;
        };

        if idle >= self.config.max_idle {
            self.dispose(id);
            self.stats.disposed_on_release = self.stats.disposed_on_release.saturating_add(1);
            return;
        }

        pixmap.fill(Color::TRANSPARENT);
        slot.pixmap = Some(pixmap);
        slot.in_use = false;
        slot.last_access = Instant::now();
    }

    fn dispose(&mut self, id: SurfaceId) {
        self.slots.remove(&id);
        self.memory.untrack(id);
    }

    fn idle_count(&self) -> usize {
        self.slots.values().filter(|slot| !slot.in_use).count()
    }

    /// Evict idle surfaces when tracked memory has reached the high-water
    /// mark. Returns the number disposed.
    pub fn enforce_budget(&mut self) -> usize {
        self.enforce_budget_at(Instant::now())
    }

    fn enforce_budget_at(&mut self, now: Instant) -> usize {
        if !self.memory.under_pressure() {
            return 0;
        }

        let candidates: Vec<EvictionCandidate> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.in_use)
            .map(|(id, slot)| EvictionCandidate {
                id: *id,
                bytes: surface_bytes(slot.width, slot.height),
                idle: now.saturating_duration_since(slot.last_access),
                access_count: slot.access_count,
            })
            .collect();

        let victims = self.memory.plan_eviction(&candidates);
        for id in &victims {
            self.dispose(*id);
        }
        self.memory.record_evictions(victims.len());
        self.stats.evictions = self.stats.evictions.saturating_add(victims.len() as u64);

        if !victims.is_empty() {
            info!(
                evicted = victims.len(),
                used = self.memory.used(),
                budget = self.memory.budget(),
                "memory pressure eviction"
            );
        }
        victims.len()
    }

    /// Dispose every surface. Outstanding leases are dropped on return.
    pub fn clear(&mut self) {
        let ids: Vec<SurfaceId> = self.slots.keys().copied().collect();
        for id in ids {
            self.dispose(id);
        }
        debug!("surface pool cleared");
    }

    pub fn memory_used(&self) -> u64 {
        self.memory.used()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle_count();
        PoolStats {
            live: self.slots.len(),
            idle,
            in_use: self.slots.len() - idle,
            bytes: self.memory.used(),
            ..self.stats
        }
    }
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width, height).ok_or_else(|| {
        TilemarkError::RenderError(format!("surface {width}x{height} could not be allocated"))
    })
}

/// Run the budget check on a fixed interval, independent of allocations.
///
/// Abort the returned handle on shutdown.
pub fn spawn_memory_sweep(pool: SharedPool, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .enforce_budget();
            if evicted > 0 {
                debug!(evicted, "memory sweep evicted surfaces");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_pool_size: usize) -> PoolConfig {
        PoolConfig {
            max_pool_size,
            max_idle: max_pool_size,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn eleventh_acquire_is_exhausted() {
        let mut pool = SurfacePool::new(config(10));
        let mut leases: Vec<SurfaceLease> =
            (0..10).map(|_| pool.acquire(64, 64).unwrap()).collect();

        assert!(matches!(
            pool.acquire(64, 64),
            Err(TilemarkError::PoolExhausted { capacity: 10 })
        ));
        assert_eq!(pool.live_count(), 10);

        pool.release(leases.pop().unwrap());
        assert!(pool.acquire(64, 64).is_ok());
        assert_eq!(pool.live_count(), 10);
    }

    #[test]
    fn similar_area_is_reused() {
        let mut pool = SurfacePool::new(config(4));
        let lease = pool.acquire(100, 100).unwrap();
        let id = lease.id();
        pool.release(lease);

        // 150x100 is 1.5x the area: reused and resized.
        let again = pool.acquire(150, 100).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!((again.width(), again.height()), (150, 100));
        assert_eq!(pool.stats().reuses, 1);
        assert_eq!(pool.memory_used(), surface_bytes(150, 100));
    }

    #[test]
    fn dissimilar_area_allocates() {
        let mut pool = SurfacePool::new(config(4));
        let lease = pool.acquire(100, 100).unwrap();
        pool.release(lease);

        let big = pool.acquire(300, 100).unwrap();
        assert_eq!(pool.stats().allocations, 2);
        assert_eq!(pool.stats().live, 2);
        pool.release(big);
    }

    #[test]
    fn released_surface_is_cleared() {
        let mut pool = SurfacePool::new(config(2));
        let mut lease = pool.acquire(8, 8).unwrap();
        lease.pixmap_mut().fill(Color::BLACK);
        lease.alpha = 0.2;
        pool.release(lease);

        let again = pool.acquire(8, 8).unwrap();
        assert!(again.pixmap().data().iter().all(|&b| b == 0));
        assert_eq!(again.alpha, 1.0);
    }

    #[test]
    fn at_capacity_lru_idle_is_evicted() {
        let mut pool = SurfacePool::new(config(2));
        let a = pool.acquire(10, 10).unwrap();
        let b = pool.acquire(10, 10).unwrap();
        let a_id = a.id();
        pool.release(a);

        // 1000x1000 cannot reuse the 10x10 idle slot, so it evicts it.
        let big = pool.acquire(1000, 1000).unwrap();
        assert_ne!(big.id(), a_id);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.stats().evictions, 1);
        pool.release(b);
        pool.release(big);
    }

    #[test]
    fn excess_idle_surfaces_are_disposed() {
        let mut pool = SurfacePool::new(PoolConfig {
            max_pool_size: 4,
            max_idle: 1,
            ..PoolConfig::default()
        });
        let a = pool.acquire(10, 10).unwrap();
        let b = pool.acquire(10, 10).unwrap();
        pool.release(a);
        pool.release(b);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.disposed_on_release, 1);
    }

    #[test]
    fn pressure_eviction_spares_in_use() {
        // 100x100 surfaces are 40_000 bytes; budget 100_000.
        let mut pool = SurfacePool::new(PoolConfig {
            max_pool_size: 10,
            max_idle: 10,
            memory_budget_bytes: 100_000,
            ..PoolConfig::default()
        });

        let held = pool.acquire(100, 100).unwrap();
        let idle = pool.acquire(100, 100).unwrap();
        let idle_id = idle.id();
        pool.release(idle);
        assert_eq!(pool.memory_used(), 80_000);

        // The large surface pushes usage far past the budget; only the idle
        // surface may go.
        let big = pool.acquire(300, 300).unwrap();
        assert!(!pool.slots.contains_key(&idle_id));
        assert!(pool.slots.contains_key(&held.id()));
        assert_eq!(pool.stats().in_use, 2);
        assert_eq!(pool.memory_used(), 40_000 + 360_000);

        pool.release(held);
        pool.release(big);
    }

    #[test]
    fn eviction_reaches_low_water() {
        let mut pool = SurfacePool::new(PoolConfig {
            max_pool_size: 10,
            max_idle: 10,
            memory_budget_bytes: 200_000,
            ..PoolConfig::default()
        });

        // Five idle 40 kB surfaces plus one leased: 240 kB tracked.
        let leases: Vec<SurfaceLease> = (0..6).map(|_| pool.acquire(100, 100).unwrap()).collect();
        let mut leases = leases.into_iter();
        let held = leases.next().unwrap();
        for lease in leases {
            pool.release(lease);
        }

        let evicted = pool.enforce_budget();
        assert!(evicted > 0);
        assert!(pool.memory_used() <= 120_000, "used {}", pool.memory_used());
        assert!(pool.slots.get(&held.id()).is_some_and(|s| s.in_use));
        pool.release(held);
    }

    #[test]
    fn clear_disposes_everything() {
        let mut pool = SurfacePool::new(config(3));
        let lease = pool.acquire(10, 10).unwrap();
        pool.clear();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.memory_used(), 0);
        pool.release(lease);
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_runs_on_interval() {
        let pool = SurfacePool::shared(PoolConfig {
            memory_budget_bytes: 1_000_000,
            ..PoolConfig::default()
        });
        {
            let mut guard = pool.lock().unwrap();
            let lease = guard.acquire(100, 100).unwrap();
            guard.release(lease);
            // Shrink the budget underneath the pool so the next sweep has work.
            guard.memory = MemoryManager::new(10_000, 0.8, 0.6);
            guard.memory.track(SurfaceId(0), 40_000);
        }

        let handle = spawn_memory_sweep(pool.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.abort();

        assert_eq!(pool.lock().unwrap().live_count(), 0);
    }
}
