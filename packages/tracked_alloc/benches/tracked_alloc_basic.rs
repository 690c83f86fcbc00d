//! Basic benchmarks for the `tracked_alloc` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use tracked_alloc::{
    CapacityPool, DeepCopy, HostSpace, MemorySpace, PoolSpace, TrackedBuffer, Tracker,
    TrackingMode, deep_copy,
};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const PAYLOAD_SIZE: usize = 256;
const POOL_CAPACITY: usize = 64 * 1024 * 1024;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracked_alloc_basic");

    for mode in [TrackingMode::Enabled, TrackingMode::Disabled] {
        let suffix = match mode {
            TrackingMode::Disabled => "untracked",
            _ => "tracked",
        };

        let host = Tracker::builder(HostSpace::new()).tracking(mode).build();
        let pool = Tracker::builder(PoolSpace::from_pool(CapacityPool::with_capacity(
            POOL_CAPACITY,
        )))
        .tracking(mode)
        .build();

        group.bench_function(format!("host_allocate_free_{suffix}"), |b| {
            b.iter_custom(|iters| allocate_free(&host, iters));
        });

        group.bench_function(format!("pool_allocate_free_{suffix}"), |b| {
            b.iter_custom(|iters| allocate_free(&pool, iters));
        });

        group.bench_function(format!("host_reallocate_{suffix}"), |b| {
            b.iter_custom(|iters| reallocate(&host, iters));
        });

        group.bench_function(format!("pool_reallocate_{suffix}"), |b| {
            b.iter_custom(|iters| reallocate(&pool, iters));
        });
    }

    let host = Tracker::new(HostSpace::new());
    let pool = Tracker::new(PoolSpace::from_pool(CapacityPool::with_capacity(
        POOL_CAPACITY,
    )));

    group.bench_function("buffer_new_drop", |b| {
        b.iter(|| {
            drop(black_box(
                TrackedBuffer::new(&host, "bench", PAYLOAD_SIZE, 0_u64).unwrap(),
            ));
        });
    });

    group.bench_function("buffer_clone_read_only", |b| {
        let buffer = TrackedBuffer::new(&host, "bench", PAYLOAD_SIZE, 0_u64)
            .unwrap()
            .into_read_only();

        b.iter(|| drop(black_box(buffer.clone())));
    });

    group.bench_function("deep_copy_host_to_pool", |b| {
        let mut source = TrackedBuffer::new(&host, "source", PAYLOAD_SIZE, 1_u64).unwrap();
        let mut target = TrackedBuffer::new(&pool, "target", PAYLOAD_SIZE, 0_u64).unwrap();

        b.iter(|| deep_copy(black_box(&mut target), black_box(&mut source)));
    });

    group.finish();
}

fn allocate_free<S: MemorySpace>(tracker: &Tracker<S>, iters: u64) -> Duration {
    let start = Instant::now();

    for _ in 0..iters {
        let ptr = tracker.allocate_tracked("bench", PAYLOAD_SIZE).unwrap();

        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(black_box(ptr)) }.unwrap();
    }

    start.elapsed()
}

fn reallocate<S>(tracker: &Tracker<S>, iters: u64) -> Duration
where
    S: MemorySpace + DeepCopy<S>,
{
    let mut ptr = tracker.allocate_tracked("bench", PAYLOAD_SIZE).unwrap();

    let start = Instant::now();

    for i in 0..iters {
        let new_size = if i % 2 == 0 {
            PAYLOAD_SIZE * 2
        } else {
            PAYLOAD_SIZE
        };

        // SAFETY: Live pointer from this tracker.
        ptr = unsafe { tracker.reallocate_tracked(black_box(ptr), new_size) }.unwrap();
    }

    let elapsed = start.elapsed();

    // SAFETY: Live pointer from this tracker.
    unsafe { tracker.deallocate_tracked(ptr) }.unwrap();

    elapsed
}
