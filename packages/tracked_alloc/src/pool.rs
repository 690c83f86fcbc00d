use std::fmt::{self, Debug};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::constants::ERR_POISONED_LOCK;
use crate::{FailureMode, HostSpace, MemorySpace, RawAllocationFailure};

/// Capacity of the pool created by [`PoolSpace::new()`][crate::PoolSpace::new], in bytes.
pub const DEFAULT_POOL_CAPACITY: usize = 16_000;

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A capacity-bounded memory pool that a [`PoolSpace`][crate::PoolSpace] can wrap.
///
/// A pool is a shared, reference-counted handle: cloning it must not duplicate the pool
/// storage, only the handle. The pool owns its own failure handling - whatever it returns
/// is passed through by the pool space without retrying.
///
/// Blocks returned by the pool must be aligned to
/// [`ALLOCATION_ALIGNMENT`][crate::ALLOCATION_ALIGNMENT].
pub trait MemoryPool: Clone + Debug + Send + Sync + 'static {
    /// The memory space the pool ultimately takes its memory from. Copies into and out of
    /// pool memory are delegated to this space.
    type RootSpace: MemorySpace;

    /// Identifies the pool. Two handles to the same pool return the same ID.
    fn id(&self) -> u64;

    /// Returns the root memory space of the pool.
    fn root_space(&self) -> Self::RootSpace;

    /// Allocates a block of `size` bytes, where `size` is never zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot satisfy the request.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, RawAllocationFailure>;

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate(size)` on a handle to the same pool and
    /// must not have been deallocated yet.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

#[derive(Debug)]
struct PoolState {
    used: usize,
    allocation_count: usize,
}

#[derive(Debug)]
struct PoolInner {
    /// We need to uniquely identify each pool so that pool spaces wrapping the same pool
    /// compare equal while pool spaces wrapping different pools do not.
    pool_id: u64,

    capacity: usize,

    root: HostSpace,

    state: Mutex<PoolState>,
}

/// A [`MemoryPool`] over host memory that refuses requests once a fixed number of bytes
/// is in use.
///
/// This type acts as a cloneable handle to a shared pool instance. Multiple handles can exist
/// simultaneously and the underlying pool remains alive as long as at least one handle exists.
///
/// # Thread Safety
///
/// This type is thread-safe and can be safely shared across multiple threads.
///
/// # Example
///
/// ```
/// use tracked_alloc::{CapacityPool, MemoryPool};
///
/// let pool = CapacityPool::with_capacity(1024);
/// let handle = pool.clone();
///
/// let block = handle.allocate(1000).unwrap();
/// assert_eq!(pool.used(), 1000);
///
/// // The pool is full.
/// assert!(pool.allocate(100).is_err());
///
/// // SAFETY: The block was allocated from this pool with the same size.
/// unsafe { pool.deallocate(block, 1000) };
/// assert_eq!(pool.used(), 0);
/// ```
#[derive(Clone)]
pub struct CapacityPool {
    inner: Arc<PoolInner>,
}

impl CapacityPool {
    /// Creates a pool with [`DEFAULT_POOL_CAPACITY`] bytes of capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates a builder for a pool.
    ///
    /// # Example
    ///
    /// ```
    /// use tracked_alloc::CapacityPool;
    ///
    /// let pool = CapacityPool::builder().capacity(64 * 1024).build();
    /// assert_eq!(pool.capacity(), 64 * 1024);
    /// ```
    pub fn builder() -> CapacityPoolBuilder {
        CapacityPoolBuilder::new()
    }

    /// Creates a pool that allows at most `capacity` bytes to be in use at the same time.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                pool_id: generate_pool_id(),
                capacity,
                root: HostSpace::new(),
                state: Mutex::new(PoolState {
                    used: 0,
                    allocation_count: 0,
                }),
            }),
        }
    }

    /// The maximum number of bytes that can be in use at the same time.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// The number of bytes currently in use.
    ///
    /// This operation may block if another thread is currently accessing the pool.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.state.lock().expect(ERR_POISONED_LOCK).used
    }

    /// The number of bytes that can still be allocated.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.used())
    }

    /// The number of blocks currently allocated from the pool.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect(ERR_POISONED_LOCK)
            .allocation_count
    }
}

impl Default for CapacityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CapacityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityPool")
            .field("pool_id", &self.inner.pool_id)
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used())
            .finish()
    }
}

impl PartialEq for CapacityPool {
    fn eq(&self, other: &Self) -> bool {
        self.inner.pool_id == other.inner.pool_id
    }
}

impl Eq for CapacityPool {}

impl MemoryPool for CapacityPool {
    type RootSpace = HostSpace;

    fn id(&self) -> u64 {
        self.inner.pool_id
    }

    fn root_space(&self) -> HostSpace {
        self.inner.root
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, RawAllocationFailure> {
        // We reserve the capacity first and only then go to the root space,
        // so the lock is never held while the root space is allocating.
        {
            let mut state = self.inner.state.lock().expect(ERR_POISONED_LOCK);

            let used = state
                .used
                .checked_add(size)
                .filter(|used| *used <= self.inner.capacity)
                .ok_or_else(|| RawAllocationFailure::new(size, FailureMode::CapacityExceeded))?;

            state.used = used;
            state.allocation_count = state.allocation_count.wrapping_add(1);
        }

        match self.inner.root.allocate(size) {
            Ok(Some(ptr)) => Ok(ptr),
            Ok(None) => {
                self.release_reservation(size);
                Err(RawAllocationFailure::new(
                    size,
                    FailureMode::InvalidAllocationSize,
                ))
            }
            Err(failure) => {
                self.release_reservation(size);
                Err(failure)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: Forwarding the caller's guarantee - the block came from our root space.
        unsafe { self.inner.root.deallocate(Some(ptr), size) };

        self.release_reservation(size);
    }
}

impl CapacityPool {
    fn release_reservation(&self, size: usize) {
        let mut state = self.inner.state.lock().expect(ERR_POISONED_LOCK);

        state.used = state
            .used
            .checked_sub(size)
            .expect("released more pool capacity than was reserved - pool accounting is corrupted");
        state.allocation_count = state
            .allocation_count
            .checked_sub(1)
            .expect("released more pool blocks than were allocated - pool accounting is corrupted");
    }
}

/// Builder for creating an instance of [`CapacityPool`].
#[derive(Debug)]
#[must_use]
pub struct CapacityPoolBuilder {
    capacity: usize,
}

impl CapacityPoolBuilder {
    fn new() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }

    /// Sets the maximum number of bytes that can be in use at the same time.
    ///
    /// Defaults to [`DEFAULT_POOL_CAPACITY`].
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the pool with the specified configuration.
    #[must_use]
    pub fn build(self) -> CapacityPool {
        CapacityPool::with_capacity(self.capacity)
    }
}
