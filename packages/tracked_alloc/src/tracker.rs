use std::fmt;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, trace};

use crate::header::AllocationHeader;
use crate::record::{DestroyFn, RecordInner};
use crate::table::RecordTable;
use crate::{
    DeepCopy, Error, FailureMode, HEADER_SIZE, Label, MemorySpace, ProfilingSink,
    RawAllocationFailure, Record, RecordSummary, Result, TrackerBuilder, ViewHooks,
    deep_copy_bytes,
};

/// Global counter for generating unique tracker IDs, used to tell trackers apart in diagnostics.
static TRACKER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_tracker_id() -> u64 {
    TRACKER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Whether a [`Tracker`] maintains a list of its live allocations.
///
/// The default is [`Enabled`][Self::Enabled] in builds with debug assertions and
/// [`Disabled`][Self::Disabled] otherwise.
///
/// # Example
///
/// ```
/// use tracked_alloc::{Error, HostSpace, Tracker, TrackingMode};
///
/// let tracker = Tracker::builder(HostSpace::new())
///     .tracking(TrackingMode::Disabled)
///     .build();
///
/// // Allocations still work but there is no list of live records to report.
/// let ptr = tracker.allocate_tracked("untracked_list", 64).unwrap();
/// assert!(matches!(
///     tracker.live_records(),
///     Err(Error::CapabilityUnavailable { .. })
/// ));
///
/// // SAFETY: The pointer was returned by this tracker and is released exactly once.
/// unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum TrackingMode {
    /// Every allocation whose reference count is above zero is linked into the live record
    /// list of the tracker, which can be inspected for leak diagnosis.
    Enabled,

    /// Allocations are reference-counted and can be resolved from their data pointers but
    /// are not listed anywhere. Diagnostic operations report
    /// [`Error::CapabilityUnavailable`].
    Disabled,
}

impl Default for TrackingMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// State shared by all handles to one tracker and by all records it created.
pub(crate) struct TrackerShared<S: MemorySpace> {
    pub(crate) id: u64,
    pub(crate) space: S,
    pub(crate) mode: TrackingMode,
    pub(crate) table: RecordTable<S>,
    pub(crate) hooks: ViewHooks,
    pub(crate) sink: Option<Arc<dyn ProfilingSink>>,
}

/// Creates and resolves tracked allocations in one memory space.
///
/// Every tracked allocation is a single block laid out as `[header][payload]`. The header
/// identifies the tracking record of the allocation, so the record can be recovered from
/// nothing but a data pointer. Each record carries a reference count; the memory is returned
/// to the space exactly once, when the count drops from one to zero.
///
/// The tracker is the context object that all of this happens in. It owns the record table
/// (and thus the live record list used for leak diagnosis), the observer hooks that
/// instrumented code should call and the optional profiling sink. Nothing is process-global:
/// two trackers over the same memory space do not know about each other's allocations.
///
/// This type acts as a cloneable handle to shared state. The state remains alive as long as
/// at least one handle or at least one live allocation exists.
///
/// # Thread Safety
///
/// This type is thread-safe. All operations may be called concurrently from any thread.
///
/// # Example
///
/// ```
/// use tracked_alloc::{HostSpace, Tracker};
///
/// let tracker = Tracker::new(HostSpace::new());
///
/// let ptr = tracker.allocate_tracked("grid", 4096).unwrap();
///
/// // SAFETY: The pointer came from this tracker and is live.
/// let record = unsafe { tracker.get_record(ptr) }.unwrap();
/// assert_eq!(record.label(), "grid");
/// assert_eq!(record.ref_count(), 1);
///
/// // SAFETY: The pointer came from this tracker and is live.
/// let ptr = unsafe { tracker.reallocate_tracked(ptr, 8192) }.unwrap();
///
/// // SAFETY: The pointer came from this tracker and is released exactly once.
/// unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
/// ```
pub struct Tracker<S: MemorySpace> {
    shared: Arc<TrackerShared<S>>,
}

impl<S: MemorySpace> Tracker<S> {
    /// Creates a tracker over a memory space with the default configuration.
    #[must_use]
    pub fn new(space: S) -> Self {
        Self::builder(space).build()
    }

    /// Creates a builder for a tracker over a memory space.
    ///
    /// # Example
    ///
    /// ```
    /// use tracked_alloc::{PoolSpace, Tracker, TrackingMode, ViewHooks};
    ///
    /// let tracker = Tracker::builder(PoolSpace::new())
    ///     .tracking(TrackingMode::Enabled)
    ///     .hooks(ViewHooks::new())
    ///     .build();
    /// # let _ = tracker;
    /// ```
    pub fn builder(space: S) -> TrackerBuilder<S> {
        TrackerBuilder::new(space)
    }

    pub(crate) fn from_parts(
        space: S,
        mode: TrackingMode,
        hooks: ViewHooks,
        sink: Option<Arc<dyn ProfilingSink>>,
    ) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                id: generate_tracker_id(),
                space,
                mode,
                table: RecordTable::new(),
                hooks,
                sink,
            }),
        }
    }

    /// The memory space allocations are made from.
    #[must_use]
    pub fn space(&self) -> &S {
        &self.shared.space
    }

    /// Whether the tracker maintains a list of its live allocations.
    #[must_use]
    pub fn tracking_mode(&self) -> TrackingMode {
        self.shared.mode
    }

    /// The observer hooks that instrumented code working with this tracker's allocations calls.
    #[must_use]
    pub fn hooks(&self) -> &ViewHooks {
        &self.shared.hooks
    }

    /// Allocates a block with a `size` byte payload and creates its tracking record.
    ///
    /// The record starts with a reference count of zero and is not yet live. The caller must
    /// [increment][Record::increment] it before dropping the last handle to it. A `size` of
    /// zero still creates a record, whose block consists only of the header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the memory space cannot satisfy the request.
    pub fn allocate(&self, label: &str, size: usize) -> Result<Record<S>> {
        self.allocate_core(Label::new(label), size, None)
    }

    /// Allocates a block like [`allocate()`][Self::allocate], attaching a destroy functor.
    ///
    /// The functor receives the payload pointer and payload size. It runs exactly once,
    /// immediately before the memory is returned to the space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the memory space cannot satisfy the request.
    /// The functor is dropped without being called in that case.
    pub fn allocate_with_destroy<F>(
        &self,
        label: &str,
        size: usize,
        destroy: F,
    ) -> Result<Record<S>>
    where
        F: FnOnce(NonNull<u8>, usize) + Send + 'static,
    {
        self.allocate_core(Label::new(label), size, Some(Box::new(destroy)))
    }

    fn allocate_core(
        &self,
        label: Label,
        size: usize,
        destroy: Option<DestroyFn>,
    ) -> Result<Record<S>> {
        let alloc_size = size.checked_add(HEADER_SIZE).ok_or_else(|| {
            self.allocation_failure(
                label,
                size,
                RawAllocationFailure::new(size, FailureMode::InvalidAllocationSize),
            )
        })?;

        let block = match self.shared.space.allocate(alloc_size) {
            Ok(Some(block)) => block,
            // A conforming space never returns nothing for a nonzero size.
            Ok(None) => {
                return Err(self.allocation_failure(
                    label,
                    size,
                    RawAllocationFailure::new(alloc_size, FailureMode::OutOfMemory),
                ));
            }
            Err(failure) => return Err(self.allocation_failure(label, size, failure)),
        };

        let key = self.shared.table.reserve();
        let alloc_ptr = block.cast::<AllocationHeader>();

        // SAFETY: The block is fresh, `alloc_size >= HEADER_SIZE` bytes long and aligned to
        // ALLOCATION_ALIGNMENT as required of every memory space.
        unsafe { AllocationHeader::new(key, label).write_to(alloc_ptr) };

        // SAFETY: The block came from our space, is `alloc_size` bytes and has the header for
        // `key` written to it.
        let inner = Arc::new(unsafe {
            RecordInner::new(
                key,
                alloc_ptr,
                alloc_size,
                label,
                destroy,
                Arc::clone(&self.shared),
            )
        });

        self.shared.table.lock().publish(key, &inner);

        let record = Record::from_inner(inner);

        if let Some(sink) = &self.shared.sink {
            sink.allocate_data(S::NAME, label.as_str(), record.data(), size);
        }

        trace!(
            tracker = self.shared.id,
            space = S::NAME,
            %label,
            size,
            "tracked allocation"
        );

        Ok(record)
    }

    pub(crate) fn allocation_failure(
        &self,
        label: Label,
        size: usize,
        source: RawAllocationFailure,
    ) -> Error {
        error!(
            tracker = self.shared.id,
            space = S::NAME,
            %label,
            size,
            %source,
            "tracked allocation failed"
        );

        Error::AllocationFailure {
            space: S::NAME,
            label,
            size,
            source,
        }
    }

    pub(crate) fn buffer_too_large(&self, label: Label, len: usize, element_size: usize) -> Error {
        error!(
            tracker = self.shared.id,
            space = S::NAME,
            %label,
            len,
            element_size,
            "tracked buffer size overflows"
        );

        Error::BufferTooLarge {
            space: S::NAME,
            label,
            len,
            element_size,
        }
    }

    /// Allocates a tracked block and returns its payload pointer with a reference count of one.
    ///
    /// A `size` of zero performs no allocation at all and returns a null pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the memory space cannot satisfy the request.
    pub fn allocate_tracked(&self, label: &str, size: usize) -> Result<*mut u8> {
        if size == 0 {
            return Ok(ptr::null_mut());
        }

        let record = self.allocate(label, size)?;
        record.increment();

        Ok(record.data().as_ptr())
    }

    /// Decrements the reference count of the tracked allocation that `ptr` points to,
    /// releasing the memory if the count drops to zero.
    ///
    /// A null pointer is accepted and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if the pointer does not resolve to a live tracked
    /// allocation of this tracker.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or the [`HEADER_SIZE`] bytes before it must be readable.
    pub unsafe fn deallocate_tracked(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }

        // SAFETY: Forwarding the caller's guarantee.
        let record = unsafe { self.get_record(ptr) }?;
        record.decrement();

        Ok(())
    }

    /// Resolves a payload pointer to the tracking record of its allocation.
    ///
    /// The pointer is validated in order: it must not be null, the header in front of it must
    /// resolve to a record of this tracker and that record must own a block whose header is
    /// exactly where the pointer says it is. The first check that fails produces the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if any check fails. This is never recovered from by
    /// guessing a record - a pointer that fails the checks was never tracked by this tracker,
    /// was offset, was already released or had its header overwritten.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or the [`HEADER_SIZE`] bytes before it must be readable.
    pub unsafe fn get_record(&self, ptr: *mut u8) -> Result<Record<S>> {
        let Some(data) = NonNull::new(ptr) else {
            return Err(self.corruption(0, 0, 0));
        };

        let expected = AllocationHeader::address_of(data);

        // SAFETY: Forwarding the caller's guarantee that the header bytes are readable.
        let header = unsafe { AllocationHeader::read_before(data) };

        let Some(inner) = self.shared.table.lookup(header.record) else {
            return Err(self.corruption(ptr.addr(), expected, 0));
        };

        let found = inner.header_address();

        if found != expected {
            return Err(self.corruption(ptr.addr(), expected, found));
        }

        Ok(Record::from_inner(inner))
    }

    fn corruption(&self, pointer: usize, expected: usize, found: usize) -> Error {
        error!(
            tracker = self.shared.id,
            space = S::NAME,
            pointer,
            expected,
            found,
            "pointer does not resolve to a tracked allocation"
        );

        Error::Corruption {
            pointer,
            space: S::NAME,
            expected,
            found,
        }
    }

    /// Writes one line per live tracked allocation, oldest first.
    ///
    /// Each line names the memory space, the payload address and size, the reference count and
    /// the label. With `detail`, the record key, header address and total block size are added.
    /// Nothing is written if there are no live allocations. Reference counts and the live list
    /// are not modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] if tracking is disabled and [`Error::Io`] if
    /// writing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use tracked_alloc::{HostSpace, Tracker, TrackingMode};
    ///
    /// let tracker = Tracker::builder(HostSpace::new())
    ///     .tracking(TrackingMode::Enabled)
    ///     .build();
    ///
    /// let ptr = tracker.allocate_tracked("pressure", 128).unwrap();
    ///
    /// let mut output = Vec::new();
    /// tracker.print_records(&mut output, false).unwrap();
    ///
    /// let output = String::from_utf8(output).unwrap();
    /// assert!(output.contains("label( pressure )"));
    ///
    /// // SAFETY: The pointer was returned by this tracker and is released exactly once.
    /// unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
    /// ```
    pub fn print_records(&self, out: &mut impl io::Write, detail: bool) -> Result<()> {
        let records = self.snapshot("print_records")?;

        // The table lock is not held while writing.
        for record in &records {
            if detail {
                writeln!(
                    out,
                    "{} record( {} ) header( {:#x} ) addr( {:#x} ) size( {} ) alloc_size( {} ) count( {} ) label( {} )",
                    S::NAME,
                    record.key(),
                    record.header_address(),
                    record.data_address(),
                    record.size(),
                    record.alloc_size(),
                    record.ref_count(),
                    record.label()
                )?;
            } else {
                writeln!(
                    out,
                    "{} addr( {:#x} ) size( {} ) count( {} ) label( {} )",
                    S::NAME,
                    record.data_address(),
                    record.size(),
                    record.ref_count(),
                    record.label()
                )?;
            }
        }

        Ok(())
    }

    /// Returns a snapshot of all live tracked allocations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] if tracking is disabled.
    pub fn live_records(&self) -> Result<Vec<RecordSummary>> {
        self.snapshot("live_records")
    }

    /// Returns the number of live tracked allocations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] if tracking is disabled.
    pub fn live_count(&self) -> Result<usize> {
        self.require_tracking("live_count")?;

        Ok(self.shared.table.lock().linked_count())
    }

    fn snapshot(&self, operation: &'static str) -> Result<Vec<RecordSummary>> {
        self.require_tracking(operation)?;

        Ok(self.shared.table.lock().summarize_live())
    }

    fn require_tracking(&self, operation: &'static str) -> Result<()> {
        match self.shared.mode {
            TrackingMode::Enabled => Ok(()),
            TrackingMode::Disabled => Err(Error::CapabilityUnavailable { operation }),
        }
    }
}

impl<S: DeepCopy<S>> Tracker<S> {
    /// Moves a tracked allocation to a new block with a `new_size` byte payload.
    ///
    /// A new block is always allocated in the same memory space with the same label, even when
    /// shrinking. The first `min(old size, new_size)` bytes are copied over, the new allocation
    /// gets a reference count of one and the reference count of the old allocation is
    /// decremented, releasing it if that was the last reference. A `new_size` of zero only
    /// decrements the old allocation and returns a null pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if `ptr` (including a null `ptr`) does not resolve to a
    /// live tracked allocation of this tracker and [`Error::AllocationFailure`] if the new
    /// block cannot be allocated. The old allocation is untouched on error.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or the [`HEADER_SIZE`] bytes before it must be readable. No other
    /// thread may be writing to the old payload during the call.
    pub unsafe fn reallocate_tracked(&self, ptr: *mut u8, new_size: usize) -> Result<*mut u8> {
        // SAFETY: Forwarding the caller's guarantee.
        let old = unsafe { self.get_record(ptr) }?;

        if new_size == 0 {
            old.decrement();
            return Ok(ptr::null_mut());
        }

        let new = self.allocate_core(Label::new(old.label()), new_size, None)?;

        // SAFETY: Both payloads are live blocks of our own space, distinct, and at least
        // `min(old, new)` bytes long.
        unsafe {
            deep_copy_bytes::<S, S>(new.data(), old.data(), old.size().min(new_size));
        }

        new.increment();
        old.decrement();

        Ok(new.data().as_ptr())
    }
}

impl<S: MemorySpace> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: MemorySpace> PartialEq for Tracker<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<S: MemorySpace> Eq for Tracker<S> {}

impl<S: MemorySpace> fmt::Debug for Tracker<S> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.shared.id)
            .field("space", &self.shared.space)
            .field("mode", &self.shared.mode)
            .field("hooks", &self.shared.hooks)
            .field("sink", &self.shared.sink)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{CapacityPool, HostSpace, PoolSpace};

    assert_impl_all!(Tracker<HostSpace>: Send, Sync, Clone);
    assert_impl_all!(Tracker<PoolSpace>: Send, Sync, Clone);
    assert_impl_all!(TrackingMode: Send, Sync, Copy);

    fn tracker() -> Tracker<HostSpace> {
        Tracker::builder(HostSpace::new())
            .tracking(TrackingMode::Enabled)
            .build()
    }

    #[test]
    fn default_mode_follows_debug_assertions() {
        let expected = if cfg!(debug_assertions) {
            TrackingMode::Enabled
        } else {
            TrackingMode::Disabled
        };

        assert_eq!(TrackingMode::default(), expected);
        assert_eq!(Tracker::new(HostSpace::new()).tracking_mode(), expected);
    }

    #[test]
    fn allocate_tracked_zero_returns_null() {
        let tracker = tracker();

        let ptr = tracker.allocate_tracked("nothing", 0).unwrap();

        assert!(ptr.is_null());
        assert_eq!(tracker.live_count().unwrap(), 0);
    }

    #[test]
    fn deallocate_tracked_null_is_noop() {
        let tracker = tracker();

        // SAFETY: Null is always accepted.
        unsafe { tracker.deallocate_tracked(ptr::null_mut()) }.unwrap();
    }

    #[test]
    fn allocate_zero_size_record_is_header_only() {
        let tracker = tracker();
        let record = tracker.allocate("header_only", 0).unwrap();

        assert_eq!(record.size(), 0);
        assert_eq!(record.alloc_size(), HEADER_SIZE);

        record.increment();
        record.decrement();
    }

    #[test]
    fn get_record_null_is_corruption() {
        let tracker = tracker();

        // SAFETY: Null is always accepted.
        let error = unsafe { tracker.get_record(ptr::null_mut()) }.unwrap_err();
        assert!(matches!(error, Error::Corruption { pointer: 0, .. }));
    }

    #[test]
    fn get_record_round_trips() {
        let tracker = tracker();
        let ptr = tracker.allocate_tracked("round_trip", 77).unwrap();

        // SAFETY: Live pointer from this tracker.
        let record = unsafe { tracker.get_record(ptr) }.unwrap();
        assert_eq!(record.label(), "round_trip");
        assert_eq!(record.size(), 77);
        assert_eq!(record.data().as_ptr(), ptr);

        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
    }

    #[test]
    fn offset_pointer_is_corruption() {
        let tracker = tracker();
        let ptr = tracker.allocate_tracked("offset", 64).unwrap();

        // SAFETY: The payload is 64 bytes. The shifted lookup reads its first byte.
        unsafe { ptr.write_bytes(0xEE, 64) };

        // SAFETY: Still inside the block, so the bytes before it are readable.
        let offset = unsafe { ptr.add(1) };

        // SAFETY: See above.
        let error = unsafe { tracker.get_record(offset) }.unwrap_err();
        match error {
            Error::Corruption {
                pointer, expected, ..
            } => {
                assert_eq!(pointer, offset.addr());
                assert_eq!(expected, offset.addr() - HEADER_SIZE);
            }
            other => panic!("unexpected error: {other}"),
        }

        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
    }

    #[test]
    fn pointer_from_other_tracker_is_corruption() {
        let first = tracker();
        let second = tracker();

        let ptr = first.allocate_tracked("foreign", 32).unwrap();

        // SAFETY: The header bytes are readable, they just belong to another tracker.
        let error = unsafe { second.get_record(ptr) }.unwrap_err();
        assert!(matches!(error, Error::Corruption { .. }));

        // SAFETY: Live pointer from this tracker.
        unsafe { first.deallocate_tracked(ptr) }.unwrap();
    }

    #[test]
    fn oversized_request_is_allocation_failure() {
        let tracker = tracker();

        let error = tracker.allocate_tracked("huge", usize::MAX).unwrap_err();
        match error {
            Error::AllocationFailure {
                space,
                label,
                size,
                source,
            } => {
                assert_eq!(space, "HostSpace");
                assert_eq!(label.as_str(), "huge");
                assert_eq!(size, usize::MAX);
                assert_eq!(source.mode(), FailureMode::InvalidAllocationSize);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(tracker.live_count().unwrap(), 0);
    }

    #[test]
    fn pool_exhaustion_is_allocation_failure() {
        let tracker = Tracker::new(PoolSpace::from_pool(CapacityPool::with_capacity(256)));

        let error = tracker.allocate_tracked("too_big", 1024).unwrap_err();
        let message = error.to_string();

        assert!(message.contains("\"too_big\""));
        assert!(message.contains("\"MemoryPoolSpace\""));
        assert!(message.contains("1024 bytes"));
    }

    #[test]
    fn reallocate_grows_and_preserves_prefix() {
        let tracker = tracker();
        let ptr = tracker.allocate_tracked("grow", 8).unwrap();

        // SAFETY: 8 byte live payload.
        unsafe {
            for i in 0..8 {
                ptr.add(i).write(i as u8);
            }
        }

        // SAFETY: Live pointer from this tracker.
        let grown = unsafe { tracker.reallocate_tracked(ptr, 32) }.unwrap();
        assert_ne!(grown, ptr);

        // SAFETY: 32 byte live payload, of which the first 8 were copied.
        let prefix = unsafe { std::slice::from_raw_parts(grown, 8) };
        assert_eq!(prefix, &[0, 1, 2, 3, 4, 5, 6, 7]);

        // SAFETY: Live pointer from this tracker.
        let record = unsafe { tracker.get_record(grown) }.unwrap();
        assert_eq!(record.label(), "grow");
        assert_eq!(record.size(), 32);
        assert_eq!(record.ref_count(), 1);
        assert_eq!(tracker.live_count().unwrap(), 1);

        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(grown) }.unwrap();
        assert_eq!(tracker.live_count().unwrap(), 0);
    }

    #[test]
    fn reallocate_to_zero_releases() {
        let tracker = tracker();
        let ptr = tracker.allocate_tracked("vanish", 16).unwrap();

        // SAFETY: Live pointer from this tracker.
        let result = unsafe { tracker.reallocate_tracked(ptr, 0) }.unwrap();

        assert!(result.is_null());
        assert_eq!(tracker.live_count().unwrap(), 0);
    }

    #[test]
    fn reallocate_shared_allocation_keeps_old_alive() {
        let tracker = tracker();
        let ptr = tracker.allocate_tracked("shared", 16).unwrap();

        // SAFETY: Live pointer from this tracker.
        let old = unsafe { tracker.get_record(ptr) }.unwrap();
        old.increment();

        // SAFETY: Live pointer from this tracker.
        let new_ptr = unsafe { tracker.reallocate_tracked(ptr, 24) }.unwrap();

        assert!(!old.is_released());
        assert_eq!(old.ref_count(), 1);
        assert_eq!(tracker.live_count().unwrap(), 2);

        old.decrement();
        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(new_ptr) }.unwrap();
    }

    #[test]
    fn reallocate_null_is_corruption() {
        let tracker = tracker();

        // SAFETY: Null is always accepted.
        let error = unsafe { tracker.reallocate_tracked(ptr::null_mut(), 8) }.unwrap_err();
        assert!(matches!(error, Error::Corruption { .. }));
    }

    #[test]
    fn disabled_tracking_reports_capability_unavailable() {
        let tracker = Tracker::builder(HostSpace::new())
            .tracking(TrackingMode::Disabled)
            .build();

        let ptr = tracker.allocate_tracked("unlisted", 8).unwrap();

        let mut output = Vec::new();
        assert!(matches!(
            tracker.print_records(&mut output, true),
            Err(Error::CapabilityUnavailable {
                operation: "print_records"
            })
        ));
        assert!(matches!(
            tracker.live_count(),
            Err(Error::CapabilityUnavailable {
                operation: "live_count"
            })
        ));
        assert!(output.is_empty());

        // Resolution still works without the list.
        // SAFETY: Live pointer from this tracker.
        let record = unsafe { tracker.get_record(ptr) }.unwrap();
        assert_eq!(record.label(), "unlisted");

        // SAFETY: Live pointer from this tracker.
        unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
        assert!(record.is_released());
    }

    #[test]
    fn print_records_empty_writes_nothing() {
        let tracker = tracker();

        let mut output = Vec::new();
        tracker.print_records(&mut output, true).unwrap();

        assert!(output.is_empty());
    }

    #[test]
    fn print_records_lists_live_allocations() {
        let tracker = tracker();
        let a = tracker.allocate_tracked("alpha", 10).unwrap();
        let b = tracker.allocate_tracked("beta", 20).unwrap();

        let mut output = Vec::new();
        tracker.print_records(&mut output, false).unwrap();
        let output = String::from_utf8(output).unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("HostSpace addr( 0x"));
        assert!(lines[0].ends_with("size( 10 ) count( 1 ) label( alpha )"));
        assert!(lines[1].ends_with("size( 20 ) count( 1 ) label( beta )"));

        let mut detailed = Vec::new();
        tracker.print_records(&mut detailed, true).unwrap();
        let detailed = String::from_utf8(detailed).unwrap();
        assert!(detailed.contains("header( 0x"));
        assert!(detailed.contains(&format!("alloc_size( {} )", 10 + HEADER_SIZE)));

        // Printing does not change anything.
        assert_eq!(tracker.live_count().unwrap(), 2);

        // SAFETY: Live pointers from this tracker.
        unsafe {
            tracker.deallocate_tracked(a).unwrap();
            tracker.deallocate_tracked(b).unwrap();
        }
    }

    #[test]
    fn clones_share_state() {
        let tracker = tracker();
        let clone = tracker.clone();

        assert_eq!(tracker, clone);
        assert_ne!(tracker, self::tracker());

        let ptr = clone.allocate_tracked("via_clone", 8).unwrap();
        assert_eq!(tracker.live_count().unwrap(), 1);

        // SAFETY: Live pointer from the shared tracker.
        unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
    }
}
