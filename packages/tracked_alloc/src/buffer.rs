use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::slice;

use crate::{
    ALLOCATION_ALIGNMENT, Access, DeepCopy, Label, MemorySpace, ReadOnly, ReadWrite, Record,
    Result, Tracker, deep_copy_bytes,
};

/// One unit of reference count on a record, given back when dropped.
struct CountedRecord<S: MemorySpace> {
    record: Record<S>,
}

impl<S: MemorySpace> CountedRecord<S> {
    fn adopt(record: Record<S>) -> Self {
        record.increment();
        Self { record }
    }
}

impl<S: MemorySpace> Clone for CountedRecord<S> {
    fn clone(&self) -> Self {
        Self::adopt(self.record.clone())
    }
}

impl<S: MemorySpace> Drop for CountedRecord<S> {
    fn drop(&mut self) {
        self.record.decrement();
    }
}

/// A typed, fixed-length buffer of `T` in tracked memory.
///
/// The buffer holds one reference count on its tracked allocation for as long as it exists.
/// Creating a buffer and copying between buffers are instrumented: they expose the buffers
/// involved to the [observer hooks][crate::ViewHooks] of the tracker.
///
/// The access kind `A` fixes the mutability of the elements:
///
/// * [`ReadWrite`] buffers are unique and allow mutation.
/// * [`ReadOnly`] buffers can be cloned, with every clone sharing the same allocation
///   and adding a reference count to it. They never expose mutable access.
///
/// # Example
///
/// ```
/// use tracked_alloc::{HostSpace, PoolSpace, TrackedBuffer, Tracker, deep_copy};
///
/// let host = Tracker::new(HostSpace::new());
/// let pool = Tracker::new(PoolSpace::new());
///
/// let mut source = TrackedBuffer::new(&host, "source", 4, 0_u32).unwrap();
/// source.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
///
/// let mut target = TrackedBuffer::new(&pool, "target", 4, 0_u32).unwrap();
/// deep_copy(&mut target, &mut source);
///
/// let shared = target.into_read_only();
/// let another = shared.clone();
/// assert_eq!(another.as_slice(), &[1, 2, 3, 4]);
/// assert_eq!(shared.record().ref_count(), 2);
/// ```
pub struct TrackedBuffer<T, S: MemorySpace, A: Access = ReadWrite> {
    owner: CountedRecord<S>,
    data: NonNull<T>,
    len: usize,
    _access: PhantomData<A>,
}

// SAFETY: The buffer owns its elements like a `Box<[T]>` (read-write) or shares them
// immutably like an `Arc<[T]>` (read-only). Requiring both bounds covers either case.
unsafe impl<T: Send + Sync, S: MemorySpace, A: Access> Send for TrackedBuffer<T, S, A> {}

// SAFETY: Shared references only ever give out `&[T]`.
unsafe impl<T: Send + Sync, S: MemorySpace, A: Access> Sync for TrackedBuffer<T, S, A> {}

impl<T, S> TrackedBuffer<T, S, ReadWrite>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
{
    /// Allocates a buffer of `len` elements in the memory space of `tracker`, with every
    /// element set to `fill`.
    ///
    /// The new buffer is exposed to the mutating callback of the tracker's hooks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`][crate::Error::AllocationFailure] if the memory
    /// space cannot satisfy the request and [`Error::BufferTooLarge`][crate::Error::BufferTooLarge]
    /// if `len` elements of `T` do not fit in the address space.
    pub fn new(tracker: &Tracker<S>, label: &str, len: usize, fill: T) -> Result<Self> {
        const {
            assert!(
                align_of::<T>() <= ALLOCATION_ALIGNMENT,
                "element alignment exceeds the alignment of tracked allocations"
            );
        };

        let size = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| tracker.buffer_too_large(Label::new(label), len, size_of::<T>()))?;

        let record = tracker.allocate(label, size)?;
        let data = record.data().cast::<T>();

        // Zero-sized elements have nothing to write, however many there are.
        if size_of::<T>() != 0 {
            for index in 0..len {
                // SAFETY: The payload holds `len` elements and is suitably aligned for T,
                // as guaranteed by the assertion above and the header size.
                unsafe { data.add(index).write(fill) };
            }
        }

        let mut buffer = Self {
            owner: CountedRecord::adopt(record),
            data,
            len,
            _access: PhantomData,
        };

        tracker.hooks().call(&mut buffer);

        Ok(buffer)
    }

    /// Returns a mutable pointer to the first element.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_ptr()
    }

    /// Returns the elements as a mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: The payload holds `len` initialized elements, read-write buffers are unique
        // and the exclusive borrow of `self` prevents any other access for the lifetime.
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }

    /// Converts the buffer into a read-only buffer over the same allocation.
    #[must_use]
    pub fn into_read_only(self) -> TrackedBuffer<T, S, ReadOnly> {
        TrackedBuffer {
            owner: self.owner,
            data: self.data,
            len: self.len,
            _access: PhantomData,
        }
    }
}

impl<T, S, A> TrackedBuffer<T, S, A>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
    A: Access,
{
    /// The number of elements in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The label of the underlying tracked allocation.
    #[must_use]
    pub fn label(&self) -> &str {
        self.owner.record.label()
    }

    /// The tracking record of the underlying allocation.
    #[must_use]
    pub fn record(&self) -> &Record<S> {
        &self.owner.record
    }

    /// Returns a pointer to the first element.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    /// Returns the elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The payload holds `len` initialized elements. Mutation requires a unique
        // read-write buffer borrowed exclusively, which cannot coexist with this borrow.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl<T, S> Clone for TrackedBuffer<T, S, ReadOnly>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
{
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            data: self.data,
            len: self.len,
            _access: PhantomData,
        }
    }
}

impl<T, S: MemorySpace, A: Access> fmt::Debug for TrackedBuffer<T, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBuffer")
            .field("space", &S::NAME)
            .field("label", &self.owner.record.label())
            .field("len", &self.len)
            .field("immutable", &A::IS_IMMUTABLE)
            .finish_non_exhaustive()
    }
}

/// Copies `min(dst.len(), src.len())` elements from `src` into `dst`.
///
/// The pair of memory spaces selects the copy transport. Pairs without a [`DeepCopy`]
/// implementation are rejected when building the program.
///
/// Before copying, the source alone is exposed to the hooks of its own tracker, then the
/// destination and source are exposed as a pair to the copy hooks of the destination's tracker.
pub fn deep_copy<T, D, Src, SA>(
    dst: &mut TrackedBuffer<T, D, ReadWrite>,
    src: &mut TrackedBuffer<T, Src, SA>,
) where
    T: Copy + Send + Sync,
    D: DeepCopy<Src>,
    Src: MemorySpace,
    SA: Access,
{
    // The read is seen by the source's tracker, the pair by the destination's tracker.
    let src_hooks = src.record().hooks().clone();
    src_hooks.call(src);

    let dst_hooks = dst.record().hooks().clone();
    dst_hooks.call_copy_pair(dst, src);

    let count = dst.len.min(src.len);

    // Cannot overflow: both buffers were allocated with at least this many bytes.
    let bytes = count.wrapping_mul(size_of::<T>());

    // SAFETY: Both payloads hold at least `count` elements. The destination is a unique
    // read-write buffer, so it cannot share its allocation with the source.
    unsafe { deep_copy_bytes::<D, Src>(dst.data.cast(), src.data.cast(), bytes) };
}
