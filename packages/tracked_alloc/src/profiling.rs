use std::fmt::Debug;
use std::ptr::NonNull;

/// Receives allocation events from a [`Tracker`][crate::Tracker] for external profiling tools.
///
/// This is fire-and-forget instrumentation. The tracker does not act on anything the sink does
/// and the sink is never on the correctness path of an allocation.
///
/// # Example
///
/// ```
/// use std::ptr::NonNull;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use tracked_alloc::{HostSpace, ProfilingSink, Tracker};
///
/// #[derive(Debug, Default)]
/// struct BytesInUse(AtomicUsize);
///
/// impl ProfilingSink for BytesInUse {
///     fn allocate_data(&self, _space: &str, _label: &str, _data: NonNull<u8>, size: usize) {
///         self.0.fetch_add(size, Ordering::Relaxed);
///     }
///
///     fn deallocate_data(&self, _space: &str, _label: &str, _data: NonNull<u8>, size: usize) {
///         self.0.fetch_sub(size, Ordering::Relaxed);
///     }
/// }
///
/// let sink = Arc::new(BytesInUse::default());
/// let tracker = Tracker::builder(HostSpace::new())
///     .profiling_sink(Arc::clone(&sink) as Arc<dyn ProfilingSink>)
///     .build();
///
/// let ptr = tracker.allocate_tracked("profiled", 256).unwrap();
/// assert_eq!(sink.0.load(Ordering::Relaxed), 256);
///
/// // SAFETY: The pointer was returned by this tracker and is released exactly once.
/// unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
/// assert_eq!(sink.0.load(Ordering::Relaxed), 0);
/// ```
pub trait ProfilingSink: Debug + Send + Sync {
    /// Called after a tracked allocation was created, with its payload pointer and size.
    fn allocate_data(&self, space: &str, label: &str, data: NonNull<u8>, size: usize);

    /// Called immediately before a tracked allocation is returned to its memory space.
    fn deallocate_data(&self, space: &str, label: &str, data: NonNull<u8>, size: usize);
}
