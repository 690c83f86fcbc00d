use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::{ALLOCATION_ALIGNMENT, FailureMode, MemorySpace, RawAllocationFailure};

/// Memory space that governs plain host memory, obtained from the global Rust allocator.
///
/// All instances of `HostSpace` are equal - there is only one host heap.
///
/// # Example
///
/// ```
/// use tracked_alloc::{HostSpace, MemorySpace, Tracker};
///
/// let tracker = Tracker::new(HostSpace::new());
/// assert_eq!(tracker.space().name(), "HostSpace");
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct HostSpace;

impl HostSpace {
    /// Returns the host memory space.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MemorySpace for HostSpace {
    const NAME: &'static str = "HostSpace";

    fn allocate(&self, size: usize) -> Result<Option<NonNull<u8>>, RawAllocationFailure> {
        if size == 0 {
            return Ok(None);
        }

        let layout = Layout::from_size_align(size, ALLOCATION_ALIGNMENT)
            .map_err(|_layout_error| {
                RawAllocationFailure::new(size, FailureMode::InvalidAllocationSize)
            })?;

        // SAFETY: The layout has a non-zero size, checked above.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr)
            .map(Some)
            .ok_or_else(|| RawAllocationFailure::new(size, FailureMode::OutOfMemory))
    }

    unsafe fn deallocate(&self, ptr: Option<NonNull<u8>>, size: usize) {
        let Some(ptr) = ptr else {
            return;
        };

        // SAFETY: The caller guarantees that the block was allocated by `allocate(size)`,
        // which only succeeds if this exact layout is valid.
        let layout = unsafe { Layout::from_size_align_unchecked(size, ALLOCATION_ALIGNMENT) };

        // SAFETY: The caller guarantees that the block was allocated by us with this layout
        // and that it has not been deallocated yet.
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(HostSpace: Send, Sync, Copy);

    #[test]
    fn zero_size_returns_none() {
        assert!(HostSpace::new().allocate(0).unwrap().is_none());
    }

    #[test]
    fn allocation_is_aligned_and_writable() {
        let space = HostSpace::new();
        let block = space.allocate(100).unwrap().unwrap();

        assert_eq!(block.as_ptr().addr() % ALLOCATION_ALIGNMENT, 0);

        // SAFETY: The block is 100 bytes long.
        unsafe {
            block.as_ptr().write_bytes(0xAB, 100);
            assert_eq!(block.as_ptr().add(99).read(), 0xAB);
            space.deallocate(Some(block), 100);
        }
    }

    #[test]
    fn deallocate_none_is_noop() {
        // SAFETY: None is always acceptable.
        unsafe { HostSpace::new().deallocate(None, 64) };
    }

    #[test]
    fn impossible_size_is_invalid() {
        let failure = HostSpace::new().allocate(usize::MAX).unwrap_err();

        assert_eq!(failure.mode(), FailureMode::InvalidAllocationSize);
        assert_eq!(failure.size(), usize::MAX);
    }

    #[test]
    fn name_is_static() {
        assert_eq!(HostSpace::new().name(), "HostSpace");
        assert_eq!(HostSpace::NAME, "HostSpace");
    }
}
