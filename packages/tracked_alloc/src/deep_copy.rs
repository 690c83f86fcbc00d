//! Byte copies between memory spaces, selected by the pair of space types.

use std::ptr::{self, NonNull};

use tracing::trace;

use crate::{HostSpace, MemoryPool, MemorySpace, PoolSpace};

/// Copies bytes from memory of the `Src` space into memory of the implementing space.
///
/// The copy transport is chosen purely by the static pairing of space types. A pair of
/// spaces that has no implementation cannot be copied between - this is rejected when
/// building the program, not at runtime.
///
/// ```compile_fail
/// use std::ptr::NonNull;
///
/// use tracked_alloc::{HostSpace, MemorySpace, RawAllocationFailure, deep_copy_bytes};
///
/// #[derive(Clone, Debug)]
/// struct DeviceSpace;
///
/// impl MemorySpace for DeviceSpace {
///     const NAME: &'static str = "DeviceSpace";
///
///     fn allocate(&self, _size: usize) -> Result<Option<NonNull<u8>>, RawAllocationFailure> {
///         Ok(None)
///     }
///
///     unsafe fn deallocate(&self, _ptr: Option<NonNull<u8>>, _size: usize) {}
/// }
///
/// let mut byte = 0_u8;
/// let ptr = NonNull::from(&mut byte);
///
/// // There is no way to copy from host memory to device memory.
/// unsafe { deep_copy_bytes::<DeviceSpace, HostSpace>(ptr, ptr, 0) };
/// ```
pub trait DeepCopy<Src: MemorySpace>: MemorySpace {
    /// Copies `count` bytes from `src` (memory of the `Src` space) to `dst` (memory of this space).
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads and `dst` valid for writes of `count` bytes, both in
    /// the memory spaces the types indicate, and the two ranges must not overlap.
    unsafe fn deep_copy(dst: NonNull<u8>, src: NonNull<u8>, count: usize);
}

impl DeepCopy<Self> for HostSpace {
    unsafe fn deep_copy(dst: NonNull<u8>, src: NonNull<u8>, count: usize) {
        // SAFETY: Forwarding the caller's guarantees about validity and overlap.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), count) };
    }
}

impl<P> DeepCopy<Self> for PoolSpace<P>
where
    P: MemoryPool,
    P::RootSpace: DeepCopy<P::RootSpace>,
{
    unsafe fn deep_copy(dst: NonNull<u8>, src: NonNull<u8>, count: usize) {
        // SAFETY: Pool memory is root space memory, so the caller's guarantees carry over.
        unsafe { <P::RootSpace as DeepCopy<P::RootSpace>>::deep_copy(dst, src, count) };
    }
}

impl<P> DeepCopy<HostSpace> for PoolSpace<P>
where
    P: MemoryPool<RootSpace = HostSpace>,
{
    unsafe fn deep_copy(dst: NonNull<u8>, src: NonNull<u8>, count: usize) {
        // SAFETY: Pool memory is host memory here, so the caller's guarantees carry over.
        unsafe { <HostSpace as DeepCopy<HostSpace>>::deep_copy(dst, src, count) };
    }
}

impl<P> DeepCopy<PoolSpace<P>> for HostSpace
where
    P: MemoryPool<RootSpace = Self>,
{
    unsafe fn deep_copy(dst: NonNull<u8>, src: NonNull<u8>, count: usize) {
        // SAFETY: Pool memory is host memory here, so the caller's guarantees carry over.
        unsafe { <Self as DeepCopy<Self>>::deep_copy(dst, src, count) };
    }
}

/// Copies `count` bytes from memory of the `Src` space to memory of the `Dst` space.
///
/// # Safety
///
/// `src` must be valid for reads and `dst` valid for writes of `count` bytes, both in the
/// memory spaces the type parameters indicate, and the two ranges must not overlap.
///
/// # Example
///
/// ```
/// use std::ptr::NonNull;
///
/// use tracked_alloc::{HostSpace, PoolSpace, deep_copy_bytes};
///
/// let source = [1_u8, 2, 3, 4];
/// let mut target = [0_u8; 4];
///
/// // SAFETY: Both arrays are 4 bytes of host memory and do not overlap.
/// unsafe {
///     deep_copy_bytes::<PoolSpace, HostSpace>(
///         NonNull::from(&mut target).cast(),
///         NonNull::from(&source).cast(),
///         4,
///     );
/// }
///
/// assert_eq!(target, source);
/// ```
pub unsafe fn deep_copy_bytes<Dst, Src>(dst: NonNull<u8>, src: NonNull<u8>, count: usize)
where
    Dst: DeepCopy<Src>,
    Src: MemorySpace,
{
    trace!(
        dst_space = Dst::NAME,
        src_space = Src::NAME,
        count,
        "deep copy"
    );

    if count == 0 {
        return;
    }

    // SAFETY: Forwarding the caller's guarantees.
    unsafe { Dst::deep_copy(dst, src, count) };
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn host_to_host() {
        let source = pattern(300);
        let mut target = vec![0_u8; 300];

        // SAFETY: Both buffers are 300 bytes and distinct.
        unsafe {
            deep_copy_bytes::<HostSpace, HostSpace>(
                NonNull::new(target.as_mut_ptr()).unwrap(),
                NonNull::new(source.as_ptr().cast_mut()).unwrap(),
                300,
            );
        }

        assert_eq!(target, source);
    }

    #[test]
    fn pool_to_host_and_back() {
        let space = PoolSpace::new();
        let block = space.allocate(64).unwrap().unwrap();

        let source = pattern(64);
        let mut target = vec![0_u8; 64];

        // SAFETY: The pool block and the vectors are 64 bytes each and distinct.
        unsafe {
            deep_copy_bytes::<PoolSpace, HostSpace>(
                block,
                NonNull::new(source.as_ptr().cast_mut()).unwrap(),
                64,
            );
            deep_copy_bytes::<HostSpace, PoolSpace>(
                NonNull::new(target.as_mut_ptr()).unwrap(),
                block,
                64,
            );
            space.deallocate(Some(block), 64);
        }

        assert_eq!(target, source);
    }

    #[test]
    fn pool_to_pool() {
        let space = PoolSpace::new();
        let first = space.allocate(32).unwrap().unwrap();
        let second = space.allocate(32).unwrap().unwrap();

        // SAFETY: Both blocks are 32 bytes and distinct.
        unsafe {
            first.as_ptr().write_bytes(0x5A, 32);
            deep_copy_bytes::<PoolSpace, PoolSpace>(second, first, 32);
            assert_eq!(second.as_ptr().add(31).read(), 0x5A);

            space.deallocate(Some(first), 32);
            space.deallocate(Some(second), 32);
        }
    }

    #[test]
    fn zero_count_touches_nothing() {
        // Dangling pointers are never dereferenced for a zero-byte copy.
        // SAFETY: Zero bytes are read and written.
        unsafe {
            deep_copy_bytes::<HostSpace, HostSpace>(NonNull::dangling(), NonNull::dangling(), 0);
        }
    }
}
