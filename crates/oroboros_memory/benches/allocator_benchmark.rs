//! # Allocator Benchmarks
//!
//! - Zone: alloc/free churn with a fixed working set
//! - Hunk: mark, allocate, rewind per simulated level load
//! - Cache: acquire under eviction pressure, touch on hits
//!
//! Run with: `cargo bench --package oroboros_memory`

// Benchmarks don't need strict docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use oroboros_memory::{BackingStore, Cache, Gap, Hunk, MemoryConfig, MemorySystem, NoCache, Zone};

/// Benchmark: zone churn. Frees the oldest allocation and makes a new one.
fn bench_zone_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("zone_churn");
    for working_set in [16usize, 128] {
        group.bench_with_input(
            BenchmarkId::from_parameter(working_set),
            &working_set,
            |b, &working_set| {
                let mut store = BackingStore::new(0xc000).unwrap();
                let mut zone = Zone::new(&mut store, 0, 0xc000).unwrap();
                let mut live: Vec<usize> = (0..working_set)
                    .map(|i| zone.allocate(&mut store, 24 + i % 64, 1).unwrap())
                    .collect();
                let mut next = 0usize;
                b.iter(|| {
                    let slot = next % working_set;
                    zone.free(&mut store, live[slot]).unwrap();
                    live[slot] = zone.allocate(&mut store, black_box(24 + next % 64), 1).unwrap();
                    next += 1;
                });
            },
        );
    }
    group.finish();
}

/// Benchmark: a level worth of low allocations, then one rewind.
fn bench_hunk_level_cycle(c: &mut Criterion) {
    let mut hunk = Hunk::new(BackingStore::new(8 * 1024 * 1024).unwrap());
    c.bench_function("hunk_level_cycle", |b| {
        b.iter(|| {
            let mark = hunk.low_mark();
            for i in 0..64 {
                black_box(hunk.allocate_low(1024 + i * 16, "level", &mut NoCache).unwrap());
            }
            hunk.free_to_low_mark(mark).unwrap();
        });
    });
}

/// Benchmark: acquiring into a full cache forces one eviction per call.
fn bench_cache_pressure(c: &mut Criterion) {
    let mut store = BackingStore::new(64 * 1024).unwrap();
    let gap = Gap {
        low: 0,
        high: 64 * 1024,
    };
    let mut cache = Cache::new();
    let handles: Vec<_> = (0..128).map(|_| cache.create_handle()).collect();
    let mut next = 0usize;

    c.bench_function("cache_acquire_evict", |b| {
        b.iter(|| {
            let handle = handles[next % handles.len()];
            if cache.data(handle).unwrap().is_some() {
                cache.release(&mut store, handle).unwrap();
            }
            black_box(cache.acquire(&mut store, gap, handle, 960, "bench").unwrap());
            next += 1;
        });
    });
}

/// Benchmark: touch on resident entries.
fn bench_cache_touch(c: &mut Criterion) {
    let mut memory = MemorySystem::new(&MemoryConfig::default()).unwrap();
    let handles: Vec<_> = (0..256)
        .map(|_| {
            let handle = memory.create_handle();
            memory.cache_acquire(handle, 512, "hit").unwrap();
            handle
        })
        .collect();
    let mut next = 0usize;

    c.bench_function("cache_touch_hit", |b| {
        b.iter(|| {
            black_box(memory.cache_touch(handles[next % handles.len()]).unwrap());
            next += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_zone_churn,
    bench_hunk_level_cycle,
    bench_cache_pressure,
    bench_cache_touch,
);
criterion_main!(benches);
