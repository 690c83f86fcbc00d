use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, trace};

use crate::constants::ERR_POISONED_LOCK;
use crate::header::{AllocationHeader, HEADER_SIZE, RecordKey};
use crate::tracker::TrackerShared;
use crate::{Label, MemorySpace, TrackingMode, ViewHooks};

pub(crate) type DestroyFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send>;

/// The tracking record of one tracked allocation. It is the sole owner of the
/// `[AllocationHeader][payload]` block.
pub(crate) struct RecordInner<S: MemorySpace> {
    key: RecordKey,

    alloc_ptr: NonNull<AllocationHeader>,
    data: NonNull<u8>,

    /// Header plus payload.
    alloc_size: usize,

    label: Label,

    ref_count: AtomicUsize,

    /// Set exactly once, by whoever returns the memory to the space.
    released: AtomicBool,

    destroy: Mutex<Option<DestroyFn>>,

    tracker: Arc<TrackerShared<S>>,
}

// SAFETY: The raw pointers refer to a heap block owned exclusively by this record. The block
// is only freed once, guarded by `released`, and the payload is only accessed through handles
// that uphold their own aliasing rules. Everything else is Send + Sync on its own.
unsafe impl<S: MemorySpace> Send for RecordInner<S> {}

// SAFETY: See `Send` above. All mutable state is behind atomics or a mutex.
unsafe impl<S: MemorySpace> Sync for RecordInner<S> {}

impl<S: MemorySpace> RecordInner<S> {
    /// # Safety
    ///
    /// `alloc_ptr` must be a block of `alloc_size` bytes (at least `HEADER_SIZE`) allocated
    /// from the space of `tracker`, with the header for `key` already written to it.
    pub(crate) unsafe fn new(
        key: RecordKey,
        alloc_ptr: NonNull<AllocationHeader>,
        alloc_size: usize,
        label: Label,
        destroy: Option<DestroyFn>,
        tracker: Arc<TrackerShared<S>>,
    ) -> Self {
        debug_assert!(alloc_size >= HEADER_SIZE);

        // SAFETY: The caller guarantees the block is at least HEADER_SIZE bytes, so the
        // payload pointer is at most one past the end of the block.
        let data = unsafe { alloc_ptr.cast::<u8>().add(HEADER_SIZE) };

        Self {
            key,
            alloc_ptr,
            data,
            alloc_size,
            label,
            ref_count: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            destroy: Mutex::new(destroy),
            tracker,
        }
    }

    pub(crate) fn header_address(&self) -> usize {
        self.alloc_ptr.as_ptr().addr()
    }

    fn size(&self) -> usize {
        // Construction guarantees alloc_size >= HEADER_SIZE.
        self.alloc_size.wrapping_sub(HEADER_SIZE)
    }

    pub(crate) fn summary(&self) -> RecordSummary {
        RecordSummary {
            key: self.key,
            label: self.label,
            header: self.header_address(),
            data: self.data.as_ptr().addr(),
            size: self.size(),
            alloc_size: self.alloc_size,
            ref_count: self.ref_count.load(Ordering::Relaxed),
        }
    }

    /// Runs the destroy functor, notifies the profiling sink and returns the block to the space.
    fn release_memory(&self) {
        let destroy = self.destroy.lock().expect(ERR_POISONED_LOCK).take();

        if let Some(destroy) = destroy {
            destroy(self.data, self.size());
        }

        if let Some(sink) = &self.tracker.sink {
            sink.deallocate_data(S::NAME, self.label.as_str(), self.data, self.size());
        }

        trace!(
            space = S::NAME,
            label = %self.label,
            size = self.size(),
            "tracked deallocation"
        );

        // SAFETY: The block was allocated from this space with this size when the record was
        // created and `released` guarantees we get here only once.
        unsafe {
            self.tracker
                .space
                .deallocate(Some(self.alloc_ptr.cast()), self.alloc_size);
        }
    }
}

impl<S: MemorySpace> fmt::Debug for RecordInner<S> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordInner")
            .field("key", &self.key)
            .field("alloc_ptr", &self.alloc_ptr)
            .field("alloc_size", &self.alloc_size)
            .field("label", &self.label)
            .field("ref_count", &self.ref_count)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<S: MemorySpace> Drop for RecordInner<S> {
    fn drop(&mut self) {
        if *self.released.get_mut() {
            return;
        }

        // Records that were ever tracked are kept alive by the table until their count
        // drops back to zero, at which point they are released. So we only get here for a
        // record whose reference count was never incremented.
        *self.released.get_mut() = true;

        self.tracker.table.lock().vacate(self.key);

        error!(
            space = S::NAME,
            label = %self.label,
            size = self.size(),
            "tracked allocation dropped without ever being tracked"
        );

        self.release_memory();

        // No point piling a second panic on top of an in-progress one.
        if !thread::panicking() {
            panic!(
                "tracked allocation \"{}\" in memory space \"{}\" was dropped without its \
                reference count ever being incremented - this allocation was never tracked",
                self.label,
                S::NAME
            );
        }
    }
}

/// Handle to the tracking record of a tracked allocation.
///
/// The handle gives access to the allocation's metadata and its reference count. Holding a
/// handle keeps the record object alive but does not by itself keep the memory alive - the
/// memory is released when the reference count drops from one to zero, regardless of how
/// many handles still exist. Use [`increment()`][Self::increment] to become an owner.
///
/// A record created via [`Tracker::allocate()`][crate::Tracker::allocate] starts with a
/// reference count of zero. It must be incremented at least once before the last handle to
/// it is dropped, otherwise dropping the last handle releases the memory and panics, as an
/// allocation that was never tracked indicates a programming error. The block is returned to
/// its memory space before the panic, but the small bookkeeping allocation holding the record
/// itself is leaked on that path, because the panic unwinds out of its destructor.
///
/// # Thread Safety
///
/// This type is thread-safe. Reference count changes from any thread are consistent with
/// the live record list of the tracker.
///
/// # Example
///
/// ```
/// use tracked_alloc::{HostSpace, Tracker};
///
/// let tracker = Tracker::new(HostSpace::new());
/// let record = tracker.allocate("coefficients", 1024).unwrap();
/// assert_eq!(record.ref_count(), 0);
///
/// record.increment();
/// assert_eq!(record.ref_count(), 1);
/// assert_eq!(record.label(), "coefficients");
/// assert_eq!(record.size(), 1024);
///
/// // Dropping the count back to zero releases the memory.
/// record.decrement();
/// assert!(record.is_released());
/// ```
pub struct Record<S: MemorySpace> {
    inner: Arc<RecordInner<S>>,
}

impl<S: MemorySpace> Record<S> {
    pub(crate) fn from_inner(inner: Arc<RecordInner<S>>) -> Self {
        Self { inner }
    }

    /// The observer hooks of the tracker that created the record.
    pub(crate) fn hooks(&self) -> &ViewHooks {
        &self.inner.tracker.hooks
    }

    /// The label the allocation was created with, truncated to
    /// [`LABEL_CAPACITY`][crate::LABEL_CAPACITY] minus one bytes.
    #[must_use]
    pub fn label(&self) -> &str {
        self.inner.label.as_str()
    }

    /// Pointer to the payload of the allocation.
    ///
    /// The pointer is valid for reads and writes of [`size()`][Self::size] bytes for as long
    /// as the reference count is above zero.
    #[must_use]
    pub fn data(&self) -> NonNull<u8> {
        self.inner.data
    }

    /// Size of the payload in bytes, as requested by the caller.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Total size of the underlying block in bytes, including the allocation header.
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        self.inner.alloc_size
    }

    /// The current reference count.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.ref_count.load(Ordering::Acquire)
    }

    /// The memory space the allocation was made from.
    #[must_use]
    pub fn space(&self) -> &S {
        &self.inner.tracker.space
    }

    /// Whether the memory of the allocation has already been returned to its space.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Increments the reference count.
    ///
    /// The increment from zero to one makes the record live: from then on the tracker keeps
    /// the record alive and, with tracking enabled, lists it among its live records.
    ///
    /// # Panics
    ///
    /// Panics if the memory of the allocation has already been released, as that means the
    /// caller was holding on to an allocation it did not own.
    pub fn increment(&self) {
        let ref_count = &self.inner.ref_count;

        loop {
            let current = ref_count.load(Ordering::Acquire);

            if current == 0 {
                if self.try_activate() {
                    return;
                }

                continue;
            }

            let next = current
                .checked_add(1)
                .expect("tracked allocation reference count overflow");

            if ref_count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Decrements the reference count.
    ///
    /// The decrement from one to zero is the only path that releases the memory: the record
    /// is removed from the live records, the destroy functor (if any) runs and the block is
    /// returned to the memory space.
    ///
    /// # Panics
    ///
    /// Panics if the reference count is already zero.
    pub fn decrement(&self) {
        let ref_count = &self.inner.ref_count;

        loop {
            let current = ref_count.load(Ordering::Acquire);

            assert!(
                current != 0,
                "reference count of tracked allocation \"{}\" decremented below zero",
                self.inner.label
            );

            if current == 1 {
                if self.try_retire() {
                    return;
                }

                continue;
            }

            // Cannot underflow, checked above.
            let next = current.wrapping_sub(1);

            if ref_count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Attempts the zero to one transition. Returns `false` if the count changed concurrently.
    fn try_activate(&self) -> bool {
        let inner = &self.inner;

        {
            let mut table = inner.tracker.table.lock();

            if !inner.released.load(Ordering::Acquire) {
                if inner
                    .ref_count
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return false;
                }

                let link = inner.tracker.mode == TrackingMode::Enabled;
                table.activate(inner.key, Arc::clone(inner), link);

                return true;
            }
        }

        // Outside the lock, so the table does not get poisoned.
        panic!(
            "cannot increment the reference count of tracked allocation \"{}\" - its memory \
            has already been released",
            inner.label
        );
    }

    /// Attempts the one to zero transition. Returns `false` if the count changed concurrently.
    fn try_retire(&self) -> bool {
        let inner = &self.inner;

        let owner = {
            let mut table = inner.tracker.table.lock();

            if inner
                .ref_count
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }

            let already_released = inner.released.swap(true, Ordering::AcqRel);
            assert!(
                !already_released,
                "tracked allocation \"{}\" released twice",
                inner.label
            );

            table.retire(inner.key)
        };

        inner.release_memory();

        // `self` still holds a reference, so this never runs the record's `Drop`.
        drop(owner);

        true
    }
}

impl<S: MemorySpace> Clone for Record<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MemorySpace> PartialEq for Record<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: MemorySpace> Eq for Record<S> {}

impl<S: MemorySpace> fmt::Debug for Record<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("space", &S::NAME)
            .field("label", &self.inner.label)
            .field("data", &self.inner.data)
            .field("size", &self.size())
            .field("ref_count", &self.ref_count())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Point-in-time snapshot of one live tracked allocation, as reported by
/// [`Tracker::live_records()`][crate::Tracker::live_records].
#[derive(Clone, Debug)]
pub struct RecordSummary {
    key: RecordKey,
    label: Label,
    header: usize,
    data: usize,
    size: usize,
    alloc_size: usize,
    ref_count: usize,
}

impl RecordSummary {
    /// The label of the allocation.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// Address of the payload of the allocation.
    #[must_use]
    pub fn data_address(&self) -> usize {
        self.data
    }

    /// Address of the allocation header, which is also the start of the underlying block.
    #[must_use]
    pub fn header_address(&self) -> usize {
        self.header
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total size of the underlying block in bytes, including the allocation header.
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// The reference count at the time the snapshot was taken.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub(crate) fn key(&self) -> RecordKey {
        self.key
    }
}
