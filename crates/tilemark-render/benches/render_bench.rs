// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for surface pooling and mark rendering.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tilemark_core::config::{PoolConfig, RenderConfig};
use tilemark_core::mark::MarkSpec;
use tilemark_render::{FontBook, MarkRenderer, SurfacePool};

/// Acquire/release cycle on a warm pool.
fn bench_pool_cycle(c: &mut Criterion) {
    let mut pool = SurfacePool::new(PoolConfig::default());
    c.bench_function("pool acquire+release 512x256", |b| {
        b.iter(|| {
            let lease = pool.acquire(512, 256).expect("acquire failed");
            pool.release(black_box(lease));
        });
    });
}

/// Uncached renders at a few rotations.
fn bench_render(c: &mut Criterion) {
    let renderer = MarkRenderer::new(
        SurfacePool::shared(PoolConfig::default()),
        Arc::new(FontBook::new()),
        RenderConfig::default(),
    );

    let mut group = c.benchmark_group("render_text");
    for rotation in [0.0f32, -45.0, 90.0] {
        let spec = MarkSpec::text("CONFIDENTIAL").with_rotation(rotation);
        group.bench_function(format!("{rotation} deg"), |b| {
            b.iter(|| {
                renderer.clear_cache();
                black_box(renderer.render(black_box(&spec)).expect("render failed"));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pool_cycle, bench_render);
criterion_main!(benches);
