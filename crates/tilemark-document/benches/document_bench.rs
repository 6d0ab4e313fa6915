// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for grid layout and text extraction.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tilemark_core::mark::{DensityMode, GridLayout, Size};
use tilemark_core::types::DocumentFormat;
use tilemark_document::convert::extract;
use tilemark_document::layout;

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Three staggered, jittered layers of a 120x40pt mark on an A4 page.
fn bench_grid_layout(c: &mut Criterion) {
    let page = Size::new(595.28, 841.89);
    let mark = Size::new(120.0, 40.0);
    let grid = GridLayout {
        layers: 3,
        density: DensityMode::Dense,
        stagger: true,
        ..GridLayout::default()
    };

    c.bench_function("grid_layout (A4, 3 layers, dense)", |b| {
        b.iter(|| black_box(layout(black_box(page), black_box(mark), &grid)));
    });
}

/// Tier-one RTF stripping over a few hundred paragraphs.
fn bench_rtf_extraction(c: &mut Criterion) {
    let mut rtf = String::from(r"{\rtf1\ansi{\fonttbl{\f0 Helvetica;}}");
    for i in 0..300 {
        rtf.push_str(&format!(r"\pard\b Section {i}\b0\par Body text for paragraph {i}.\par "));
    }
    rtf.push('}');
    let bytes = rtf.into_bytes();

    c.bench_function("extract (rtf, 300 paragraphs)", |b| {
        b.iter(|| black_box(extract(black_box(&bytes), DocumentFormat::Rtf)));
    });
}

criterion_group!(benches, bench_grid_layout, bench_rtf_extraction);
criterion_main!(benches);
