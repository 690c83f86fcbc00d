#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Reference-counted, header-tagged tracked allocations over interchangeable memory spaces.
//!
//! This crate lets a program allocate raw memory from one of several backing stores
//! ("memory spaces") while:
//!
//! - attaching a metadata header to every allocation, from which the owning tracking record
//!   can be recovered given nothing but the data pointer,
//! - reference-counting every allocation so it is freed exactly once, when its last owner
//!   releases it,
//! - keeping a list of all live allocations for leak diagnosis,
//! - supporting reallocation with data preservation and copies between memory spaces.
//!
//! Everything happens in the context of a [`Tracker`], which is created over a
//! [`MemorySpace`] and owns the record table, the [observer hooks][ViewHooks] and
//! the optional [profiling sink][ProfilingSink] for that space.
//!
//! # Memory spaces
//!
//! - [`HostSpace`] allocates from the global Rust allocator.
//! - [`PoolSpace`] allocates from a capacity-bounded [`MemoryPool`], by default a
//!   [`CapacityPool`] with [`DEFAULT_POOL_CAPACITY`] bytes of capacity.
//!
//! Custom spaces implement [`MemorySpace`] and, to take part in copies and reallocation,
//! [`DeepCopy`] for every supported pairing of spaces.
//!
//! # Raw tracked pointers
//!
//! ```rust
//! use tracked_alloc::{HostSpace, Tracker, TrackingMode};
//!
//! let tracker = Tracker::builder(HostSpace::new())
//!     .tracking(TrackingMode::Enabled)
//!     .build();
//!
//! let ptr = tracker.allocate_tracked("temperatures", 256).unwrap();
//! assert_eq!(tracker.live_count().unwrap(), 1);
//!
//! // SAFETY: The pointer came from this tracker and is live.
//! let record = unsafe { tracker.get_record(ptr) }.unwrap();
//! assert_eq!(record.label(), "temperatures");
//!
//! // Share ownership of the allocation.
//! record.increment();
//!
//! // SAFETY: The pointer came from this tracker and is live.
//! unsafe { tracker.deallocate_tracked(ptr) }.unwrap();
//! assert!(!record.is_released());
//!
//! record.decrement();
//! assert!(record.is_released());
//! assert_eq!(tracker.live_count().unwrap(), 0);
//! ```
//!
//! # Typed buffers
//!
//! [`TrackedBuffer`] is a typed, fixed-length buffer in tracked memory. Creating buffers and
//! copying between them with [`deep_copy()`] exposes them to the observer hooks of the tracker.
//!
//! ```rust
//! use tracked_alloc::{HostSpace, PoolSpace, TrackedBuffer, Tracker, deep_copy};
//!
//! let host = Tracker::new(HostSpace::new());
//! let pool = Tracker::new(PoolSpace::new());
//!
//! let mut source = TrackedBuffer::new(&host, "source", 3, 1.5_f32).unwrap();
//! let mut target = TrackedBuffer::new(&pool, "target", 3, 0.0_f32).unwrap();
//!
//! deep_copy(&mut target, &mut source);
//! assert_eq!(target.as_slice(), source.as_slice());
//! ```
//!
//! # Diagnostics
//!
//! Operations emit structured [`tracing`] events: `trace` for every tracked allocation and
//! deallocation, `debug` for live list and hook changes and `error` for allocation failures,
//! pointer validation failures and allocations dropped without ever being tracked. The crate
//! never installs a subscriber.

mod buffer;
mod builder;
mod constants;
mod deep_copy;
mod error;
mod header;
mod hooks;
mod host_space;
mod pool;
mod pool_space;
mod profiling;
mod record;
mod space;
mod table;
mod tracker;
mod view;

pub use buffer::*;
pub use builder::*;
pub use deep_copy::*;
pub use error::{Error, FailureMode, RawAllocationFailure};
pub(crate) use error::Result;
pub use header::{ALLOCATION_ALIGNMENT, HEADER_SIZE, LABEL_CAPACITY, Label};
pub use hooks::*;
pub use host_space::*;
pub use pool::*;
pub use pool_space::*;
pub use profiling::*;
pub use record::{Record, RecordSummary};
pub use space::*;
pub use tracker::{Tracker, TrackingMode};
pub use view::{Access, ConstViewHolder, ReadOnly, ReadWrite, ViewHolder, ViewRef};
