use std::ptr::NonNull;

use crate::{CapacityPool, MemoryPool, MemorySpace, RawAllocationFailure};

/// Memory space that carves allocations out of a capacity-bounded [`MemoryPool`].
///
/// The pool is held by value. Pools are themselves reference-counted handles, so cloning
/// a `PoolSpace` is cheap and never duplicates pool storage. Two pool spaces are equal if
/// they wrap the same pool.
///
/// # Example
///
/// ```
/// use tracked_alloc::{CapacityPool, PoolSpace, Tracker};
///
/// let pool = CapacityPool::with_capacity(4096);
/// let tracker = Tracker::new(PoolSpace::from_pool(pool.clone()));
///
/// let ptr = tracker.allocate_tracked("pooled", 100).unwrap();
/// assert!(pool.used() > 100);
///
/// // SAFETY: The pointer was returned by this tracker and is released exactly once.
/// unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
/// assert_eq!(pool.used(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct PoolSpace<P = CapacityPool> {
    pool: P,
}

impl PoolSpace<CapacityPool> {
    /// Creates a pool space over a new [`CapacityPool`] with the
    /// [default capacity][crate::DEFAULT_POOL_CAPACITY].
    #[must_use]
    pub fn new() -> Self {
        Self::from_pool(CapacityPool::new())
    }
}

impl Default for PoolSpace<CapacityPool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: MemoryPool> PoolSpace<P> {
    /// Creates a pool space that allocates from an existing pool.
    #[must_use]
    pub fn from_pool(pool: P) -> Self {
        Self { pool }
    }

    /// The pool this space allocates from.
    #[must_use]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// The memory space the pool takes its memory from.
    #[must_use]
    pub fn root_space(&self) -> P::RootSpace {
        self.pool.root_space()
    }
}

impl<P: MemoryPool> PartialEq for PoolSpace<P> {
    fn eq(&self, other: &Self) -> bool {
        self.pool.id() == other.pool.id()
    }
}

impl<P: MemoryPool> Eq for PoolSpace<P> {}

impl<P: MemoryPool> MemorySpace for PoolSpace<P> {
    const NAME: &'static str = "MemoryPoolSpace";

    fn allocate(&self, size: usize) -> Result<Option<NonNull<u8>>, RawAllocationFailure> {
        if size == 0 {
            return Ok(None);
        }

        self.pool.allocate(size).map(Some)
    }

    unsafe fn deallocate(&self, ptr: Option<NonNull<u8>>, size: usize) {
        if let Some(ptr) = ptr {
            // SAFETY: Forwarding the caller's guarantee that the block came from this pool.
            unsafe { self.pool.deallocate(ptr, size) };
        }
    }
}
