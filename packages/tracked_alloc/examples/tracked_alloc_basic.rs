//! Basic usage example for `tracked_alloc`.
//!
//! This example allocates tracked memory in two memory spaces, shares and reallocates it,
//! observes buffers through view hooks and prints the live allocation list.

use std::io;

use tracked_alloc::{
    CapacityPool, HostSpace, PoolSpace, TrackedBuffer, Tracker, TrackingMode, ViewHooks,
    deep_copy,
};

fn main() {
    let hooks = ViewHooks::new();

    let host = Tracker::builder(HostSpace::new())
        .tracking(TrackingMode::Enabled)
        .hooks(hooks.clone())
        .build();

    let pool = CapacityPool::builder().capacity(1024 * 1024).build();
    let device = Tracker::builder(PoolSpace::from_pool(pool.clone()))
        .tracking(TrackingMode::Enabled)
        .build();

    // Raw tracked pointers carry a header from which their record can be recovered.
    let ptr = host.allocate_tracked("raw_bytes", 100).unwrap();

    // SAFETY: The pointer came from this tracker and is live.
    let record = unsafe { host.get_record(ptr) }.unwrap();
    println!(
        "Allocated '{}' with {} bytes, reference count {}",
        record.label(),
        record.size(),
        record.ref_count()
    );

    // Growing the allocation preserves its contents.
    // SAFETY: The payload is 100 bytes.
    unsafe { ptr.write_bytes(0xAB, 100) };

    // SAFETY: The pointer came from this tracker and is live.
    let ptr = unsafe { host.reallocate_tracked(ptr, 400) }.unwrap();

    // SAFETY: The first 100 bytes were copied into the new allocation.
    let preserved = unsafe { std::slice::from_raw_parts(ptr, 100) };
    println!(
        "After reallocation the old bytes are preserved: {}",
        preserved.iter().all(|b| *b == 0xAB)
    );

    // Hooks see every buffer of the tracker they were handed to.
    hooks.set(
        |view| {
            println!(
                "  hook: mutable view '{}' ({} bytes)",
                view.label(),
                view.span_bytes()
            );
        },
        |view| {
            println!(
                "  hook: const view '{}' ({} bytes)",
                view.label(),
                view.span_bytes()
            );
        },
    );

    println!("Creating buffers:");
    let mut temperatures = TrackedBuffer::new(&host, "temperatures", 8, 21.5_f32).unwrap();
    let mut mirror = TrackedBuffer::new(&device, "temperatures_mirror", 8, 0.0_f32).unwrap();

    println!("Copying host buffer into the pool:");
    deep_copy(&mut mirror, &mut temperatures);
    println!("Mirror contents: {:?}", mirror.as_slice());
    println!("Pool usage: {} of {} bytes", pool.used(), pool.capacity());

    let readings = temperatures.into_read_only();
    let shared = readings.clone();
    println!(
        "Shared buffer reference count: {}",
        shared.record().ref_count()
    );

    println!("Live host allocations:");
    host.print_records(&mut io::stdout(), false).unwrap();

    println!("Live host allocations in detail:");
    host.print_records(&mut io::stdout(), true).unwrap();

    drop(shared);
    drop(readings);

    // SAFETY: The pointer came from this tracker and is live.
    unsafe { host.deallocate_tracked(ptr) }.unwrap();

    println!("Remaining host allocations: {}", host.live_count().unwrap());

    drop(mirror);
    println!("Pool usage after release: {} bytes", pool.used());
}
