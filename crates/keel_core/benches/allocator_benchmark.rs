//! # Allocator Benchmark
//!
//! Same mixed-size workload against every `Allocator` backend.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keel_core::{Allocator, ArenaAllocator, BinAllocator, FreeListAllocator, StandardAllocator};

const ROUNDS: usize = 1_000;

/// Request sizes cycled through by every run.
const SIZES: [usize; 8] = [16, 48, 128, 256, 64, 1024, 32, 512];

fn churn<A: Allocator>(allocator: &mut A) {
    let mut live = Vec::with_capacity(ROUNDS);
    for i in 0..ROUNDS {
        if let Some(ptr) = allocator.allocate::<u64>(SIZES[i % SIZES.len()]) {
            live.push(ptr);
        }
        // Free every third allocation early to fragment the arena.
        if i % 3 == 2 {
            if let Some(ptr) = live.pop() {
                allocator.deallocate(ptr);
            }
        }
    }
    for ptr in live.drain(..) {
        allocator.deallocate(black_box(ptr));
    }
}

fn bench_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_churn");

    group.bench_function("bin", |b| {
        let mut allocator = BinAllocator::new(4 * 1024 * 1024).unwrap();
        b.iter(|| churn(&mut allocator));
    });

    group.bench_function("free_list", |b| {
        let mut allocator = FreeListAllocator::new(1024, ROUNDS).unwrap();
        b.iter(|| churn(&mut allocator));
    });

    group.bench_function("arena", |b| {
        let mut allocator = ArenaAllocator::new(4 * 1024 * 1024).unwrap();
        b.iter(|| {
            churn(&mut allocator);
            allocator.invalidate();
        });
    });

    group.bench_function("standard", |b| {
        let mut allocator = StandardAllocator::new();
        b.iter(|| churn(&mut allocator));
    });

    group.finish();
}

fn bench_bin_offsets(c: &mut Criterion) {
    let mut allocator = BinAllocator::new(64 * 1024 * 1024).unwrap();
    c.bench_function("bin_offset_alloc_free", |b| {
        b.iter(|| {
            let offset = allocator.allocate_offset(black_box(4096), 16);
            if let Some(offset) = offset {
                allocator.deallocate_offset(offset);
            }
        });
    });
}

criterion_group!(benches, bench_backends, bench_bin_offsets);
criterion_main!(benches);
