// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for digests and stamping in the tilemark-security crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tilemark_security::{DigestAlgorithm, SigningKey, digest, stamp};

/// SHA-256 digests at sizes from a small mark PNG to a large output PDF.
fn bench_digest(c: &mut Criterion) {
    let sizes: &[(&str, usize)] = &[
        ("1 KiB", 1024),
        ("100 KiB", 100 * 1024),
        ("1 MiB", 1024 * 1024),
    ];

    let mut group = c.benchmark_group("digest_sha256");
    for &(label, size) in sizes {
        let data = vec![0xABu8; size];
        group.bench_function(label, |b| {
            b.iter(|| black_box(digest(black_box(&data), DigestAlgorithm::Sha256)));
        });
    }
    group.finish();
}

/// Full stamp (digest + ECDSA sign) of a 100 KiB artifact.
fn bench_stamp(c: &mut Criterion) {
    let key = SigningKey::generate().expect("key generation failed");
    let artifact = vec![0x42u8; 100 * 1024];

    c.bench_function("stamp (100 KiB)", |b| {
        b.iter(|| {
            let record = stamp(black_box(&artifact), DigestAlgorithm::Sha256, &key)
                .expect("stamp failed");
            black_box(record);
        });
    });
}

criterion_group!(benches, bench_digest, bench_stamp);
criterion_main!(benches);
