//! Type-erased views over tracked buffers, as seen by observer hooks.

use std::mem::size_of;

use crate::{MemorySpace, TrackedBuffer};

/// Read-only, type-erased view over a tracked buffer.
///
/// This is the entire surface that observer hooks may use to inspect a buffer. A view never
/// allows resizing or reallocating the buffer and a view over immutable data never exposes a
/// mutable pointer.
pub trait ConstViewHolder {
    /// Number of elements in the span of the view.
    fn span(&self) -> usize;

    /// Whether the elements of the span are laid out contiguously in memory.
    fn span_is_contiguous(&self) -> bool;

    /// Pointer to the first element of the view.
    fn data(&self) -> *const u8;

    /// Label of the tracked allocation the view refers to.
    fn label(&self) -> &str;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Whether the element type of the underlying buffer is immutable.
    fn is_immutable(&self) -> bool;

    /// Number of bytes covered by the span of the view.
    fn span_bytes(&self) -> usize {
        self.span().saturating_mul(self.element_size())
    }
}

/// Mutable, type-erased view over a tracked buffer whose elements are mutable.
pub trait ViewHolder: ConstViewHolder {
    /// Mutable pointer to the first element of the view.
    fn data_mut(&mut self) -> *mut u8;

    /// Returns the read-only facet of this view.
    fn as_const(&self) -> &dyn ConstViewHolder;
}

/// A view handed to observer hooks, mutable or read-only depending on the element mutability
/// of the buffer it was created from.
#[derive(Debug)]
pub enum ViewRef<'a> {
    /// View over a buffer with mutable elements.
    Mutable(&'a mut dyn ViewHolder),

    /// View over a buffer with immutable elements.
    Const(&'a dyn ConstViewHolder),
}

impl ViewRef<'_> {
    /// Returns the read-only facet of the view.
    #[must_use]
    pub fn as_const(&self) -> &dyn ConstViewHolder {
        match self {
            ViewRef::Mutable(view) => view.as_const(),
            ViewRef::Const(view) => *view,
        }
    }
}

impl std::fmt::Debug for dyn ViewHolder + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHolder")
            .field("label", &self.label())
            .field("span", &self.span())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for dyn ConstViewHolder + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstViewHolder")
            .field("label", &self.label())
            .field("span", &self.span())
            .finish_non_exhaustive()
    }
}

pub(crate) trait Sealed {}

/// Element mutability of a [`TrackedBuffer`].
///
/// This is implemented by [`ReadWrite`] and [`ReadOnly`] only.
#[expect(
    private_bounds,
    reason = "sealed trait - the set of access kinds is closed"
)]
pub trait Access: Sealed + Send + Sync + 'static {
    /// Whether buffers of this access kind have immutable elements.
    const IS_IMMUTABLE: bool;

    /// Creates the view matching this access kind and hands it to `visitor`.
    #[doc(hidden)]
    fn visit<T, S, R, F>(buffer: &mut TrackedBuffer<T, S, Self>, visitor: F) -> R
    where
        T: Copy + Send + Sync,
        S: MemorySpace,
        F: FnOnce(ViewRef<'_>) -> R,
        Self: Sized;
}

/// Marks a [`TrackedBuffer`] whose elements can be mutated. Such buffers are unique.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ReadWrite;

/// Marks a [`TrackedBuffer`] whose elements are immutable. Such buffers can be cloned,
/// with every clone sharing the same tracked allocation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ReadOnly;

impl Sealed for ReadWrite {}
impl Sealed for ReadOnly {}

impl Access for ReadWrite {
    const IS_IMMUTABLE: bool = false;

    fn visit<T, S, R, F>(buffer: &mut TrackedBuffer<T, S, Self>, visitor: F) -> R
    where
        T: Copy + Send + Sync,
        S: MemorySpace,
        F: FnOnce(ViewRef<'_>) -> R,
    {
        let mut view = MutBufferView { buffer };
        visitor(ViewRef::Mutable(&mut view))
    }
}

impl Access for ReadOnly {
    const IS_IMMUTABLE: bool = true;

    fn visit<T, S, R, F>(buffer: &mut TrackedBuffer<T, S, Self>, visitor: F) -> R
    where
        T: Copy + Send + Sync,
        S: MemorySpace,
        F: FnOnce(ViewRef<'_>) -> R,
    {
        let view = ConstBufferView { buffer: &*buffer };
        visitor(ViewRef::Const(&view))
    }
}

struct ConstBufferView<'a, T, S: MemorySpace, A: Access> {
    buffer: &'a TrackedBuffer<T, S, A>,
}

impl<T, S, A> ConstViewHolder for ConstBufferView<'_, T, S, A>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
    A: Access,
{
    fn span(&self) -> usize {
        self.buffer.len()
    }

    fn span_is_contiguous(&self) -> bool {
        true
    }

    fn data(&self) -> *const u8 {
        self.buffer.as_ptr().cast()
    }

    fn label(&self) -> &str {
        self.buffer.label()
    }

    fn element_size(&self) -> usize {
        size_of::<T>()
    }

    fn is_immutable(&self) -> bool {
        A::IS_IMMUTABLE
    }
}

struct MutBufferView<'a, T, S: MemorySpace> {
    buffer: &'a mut TrackedBuffer<T, S, ReadWrite>,
}

impl<T, S> ConstViewHolder for MutBufferView<'_, T, S>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
{
    fn span(&self) -> usize {
        self.buffer.len()
    }

    fn span_is_contiguous(&self) -> bool {
        true
    }

    fn data(&self) -> *const u8 {
        self.buffer.as_ptr().cast()
    }

    fn label(&self) -> &str {
        self.buffer.label()
    }

    fn element_size(&self) -> usize {
        size_of::<T>()
    }

    fn is_immutable(&self) -> bool {
        false
    }
}

impl<T, S> ViewHolder for MutBufferView<'_, T, S>
where
    T: Copy + Send + Sync,
    S: MemorySpace,
{
    fn data_mut(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr().cast()
    }

    fn as_const(&self) -> &dyn ConstViewHolder {
        self
    }
}

/// Hands a read-only view over any buffer to `visitor`, regardless of its access kind.
pub(crate) fn visit_const<T, S, A, R, F>(buffer: &TrackedBuffer<T, S, A>, visitor: F) -> R
where
    T: Copy + Send + Sync,
    S: MemorySpace,
    A: Access,
    F: FnOnce(&dyn ConstViewHolder) -> R,
{
    visitor(&ConstBufferView { buffer })
}
