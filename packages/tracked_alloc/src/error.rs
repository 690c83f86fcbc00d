use std::fmt;
use std::io;

use thiserror::Error;

use crate::Label;

/// Describes why a memory space could not satisfy an allocation request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum FailureMode {
    /// The backing allocator ran out of memory.
    OutOfMemory,

    /// The requested size cannot be represented as a valid allocation
    /// (e.g. it overflows when the allocation header is added to it).
    InvalidAllocationSize,

    /// A capacity-bounded pool does not have enough capacity left for the request.
    CapacityExceeded,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::OutOfMemory => "out of memory",
            Self::InvalidAllocationSize => "invalid allocation size",
            Self::CapacityExceeded => "pool capacity exceeded",
        };

        f.write_str(description)
    }
}

/// Failure reported by a [`MemorySpace`][crate::MemorySpace] or [`MemoryPool`][crate::MemoryPool]
/// when it cannot satisfy a raw allocation request.
///
/// # Example
///
/// ```
/// use tracked_alloc::{FailureMode, RawAllocationFailure};
///
/// let failure = RawAllocationFailure::new(4096, FailureMode::CapacityExceeded);
/// assert_eq!(failure.size(), 4096);
/// assert_eq!(failure.mode(), FailureMode::CapacityExceeded);
/// ```
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[error("failed to allocate {size} bytes: {mode}")]
pub struct RawAllocationFailure {
    size: usize,
    mode: FailureMode,
}

impl RawAllocationFailure {
    /// Creates a new failure description for a request of `size` bytes.
    #[must_use]
    pub fn new(size: usize, mode: FailureMode) -> Self {
        Self { size, mode }
    }

    /// The number of bytes that was requested from the memory space.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Why the request failed.
    #[must_use]
    pub fn mode(&self) -> FailureMode {
        self.mode
    }
}

/// Errors that can occur when working with tracked allocations.
///
/// None of the variants allocate memory when created or formatted, so an allocation
/// failure can always be reported, even under severe memory pressure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The memory space could not satisfy an allocation request.
    #[error(
        "failed to allocate memory for label \"{label}\": allocation of {size} bytes \
        using memory space \"{space}\" failed: {source}"
    )]
    AllocationFailure {
        /// Name of the memory space that failed to allocate.
        space: &'static str,

        /// Label of the allocation that was being created.
        label: Label,

        /// Payload size requested by the caller, excluding the allocation header.
        size: usize,

        /// The failure reported by the memory space.
        source: RawAllocationFailure,
    },

    /// A typed buffer was requested with more elements than fit in the address space.
    #[error(
        "failed to allocate memory for label \"{label}\": {len} elements of {element_size} \
        bytes each exceed the address space of memory space \"{space}\""
    )]
    BufferTooLarge {
        /// Name of the memory space the buffer was requested from.
        space: &'static str,

        /// Label of the buffer that was being created.
        label: Label,

        /// Number of elements requested by the caller.
        len: usize,

        /// Size of one element in bytes.
        element_size: usize,
    },

    /// A data pointer does not resolve to a tracked allocation of the tracker it was
    /// presented to. This is always a programming error - the pointer was never tracked,
    /// was already released, belongs to a different tracker or the header was overwritten.
    #[error(
        "pointer {pointer:#x} does not resolve to a tracked allocation in memory space \
        \"{space}\": expected an allocation header at {expected:#x} but the record refers to {found:#x}"
    )]
    Corruption {
        /// Address of the data pointer that was presented.
        pointer: usize,

        /// Name of the memory space of the tracker the pointer was presented to.
        space: &'static str,

        /// Address at which the allocation header was expected to be.
        expected: usize,

        /// Header address that the resolved record actually owns, or zero if no record
        /// could be resolved at all.
        found: usize,
    },

    /// The operation requires allocation tracking, which is disabled for this tracker.
    #[error("{operation} is only available when allocation tracking is enabled")]
    CapabilityUnavailable {
        /// Name of the operation that was requested.
        operation: &'static str,
    },

    /// Writing diagnostic output failed.
    #[error("failed to write allocation records")]
    Io(#[from] io::Error),
}

/// A specialized `Result` type for tracked allocation operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
