use std::fmt::Debug;
use std::ptr::NonNull;

use crate::RawAllocationFailure;

/// A backing store that tracked allocations can be carved from.
///
/// A memory space is a cheap value type: copies of it are handles to the same underlying
/// resource. Tracked allocation records keep a copy of the space that produced them so the
/// memory can be returned to the right place.
///
/// Implementations must be safe to call concurrently from multiple threads. This crate does
/// not serialize calls into a memory space.
///
/// # Contract
///
/// * `allocate(0)` returns `Ok(None)` without touching the backing store.
/// * `allocate(n)` for `n > 0` returns `Ok(Some(ptr))` with a block of at least `n` bytes
///   aligned to [`ALLOCATION_ALIGNMENT`][crate::ALLOCATION_ALIGNMENT], or an error. It never
///   returns `Ok(None)` for a non-zero size.
/// * `deallocate(None, _)` is a no-op.
///
/// # Example
///
/// ```
/// use tracked_alloc::{HostSpace, MemorySpace};
///
/// let space = HostSpace::new();
///
/// let block = space.allocate(128).unwrap().unwrap();
///
/// // SAFETY: The block was allocated from this space with the same size.
/// unsafe { space.deallocate(Some(block), 128) };
///
/// assert!(space.allocate(0).unwrap().is_none());
/// ```
pub trait MemorySpace: Clone + Debug + Send + Sync + 'static {
    /// Compile-time name of the memory space, used in diagnostics and profiling events.
    const NAME: &'static str;

    /// Returns the name of the memory space.
    #[must_use]
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Allocates a block of `size` bytes from the memory space.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot satisfy the request.
    fn allocate(&self, size: usize) -> Result<Option<NonNull<u8>>, RawAllocationFailure>;

    /// Returns a block to the memory space.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a block previously returned by `allocate(size)` on this memory
    /// space (or an equal one) that has not yet been deallocated.
    unsafe fn deallocate(&self, ptr: Option<NonNull<u8>>, size: usize);
}
