// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rendering surfaces: a bounded pool of tiny-skia pixmaps plus the memory
// manager that keeps their combined size under budget.

pub mod memory;
pub mod pool;

pub use memory::{EvictionCandidate, MemoryManager, MemoryStats, eviction_score, surface_bytes};
pub use pool::{PoolStats, SharedPool, SurfaceLease, SurfacePool, spawn_memory_sweep};

/// Opaque identity of a pooled surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}
