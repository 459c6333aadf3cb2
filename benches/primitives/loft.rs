//! Loft allocation against the system allocator.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_rt::loft::{HeapProvider, Loft, LoftConfig, MINIMUM_HUGEPAGE};

const SIZES: &[usize] = &[64, 1024, 8192, 65536];

pub fn bench_loft(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives/loft");
    let loft = Loft::new(Box::new(HeapProvider));
    loft.set_config(&LoftConfig {
        preallocate: 16 * MINIMUM_HUGEPAGE,
        ..LoftConfig::default()
    });
    loft.grow_preallocate(0);
    let system = Loft::system();

    for &size in SIZES {
        // free list hit after the first round
        group.bench_with_input(BenchmarkId::new("alloc_free", size), &size, |b, &size| {
            b.iter(|| drop(black_box(loft.alloc(size, 16))))
        });

        group.bench_with_input(BenchmarkId::new("system_alloc_free", size), &size, |b, &size| {
            b.iter(|| drop(black_box(system.alloc(size, 16))))
        });
    }

    // a burst of blocks held together, like a graph edit preparing buffers
    group.bench_function("burst_64x2k", |b| {
        b.iter(|| {
            let blocks: Vec<_> = (0..64).map(|_| loft.alloc(2048, 64)).collect();
            black_box(&blocks);
        })
    });

    group.finish();
}
