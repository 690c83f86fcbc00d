use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

/// Alignment guaranteed for every block returned by a [`MemorySpace`][crate::MemorySpace]
/// and therefore for the payload of every tracked allocation.
pub const ALLOCATION_ALIGNMENT: usize = 16;

/// Capacity of the label stored in the allocation header, including the terminating nul byte.
///
/// Longer labels are truncated to `LABEL_CAPACITY - 1` bytes.
pub const LABEL_CAPACITY: usize = 56;

/// Size of the header physically placed in front of the payload of every tracked allocation.
///
/// The same header size is used by all memory spaces, so the header of any tracked data
/// pointer can be located by subtracting this value from it.
pub const HEADER_SIZE: usize = size_of::<AllocationHeader>();

const _: () = assert!(HEADER_SIZE % ALLOCATION_ALIGNMENT == 0);
const _: () = assert!(HEADER_SIZE == 64);

/// Identifies the slot of a record in the record table of a tracker.
///
/// The generation changes whenever a slot is reused, so a key that outlives its record
/// never resolves to a different record that happens to occupy the same slot later.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(C)]
pub(crate) struct RecordKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// Fixed-capacity, always nul-terminated, human-readable name of a tracked allocation.
///
/// The label is stored inline, so creating, copying and formatting it never allocates.
/// This is what allows allocation failure diagnostics to be reported even when the process
/// is out of memory.
///
/// # Example
///
/// ```
/// use tracked_alloc::{LABEL_CAPACITY, Label};
///
/// let label = Label::new("particle_positions");
/// assert_eq!(label.as_str(), "particle_positions");
///
/// let long = "x".repeat(LABEL_CAPACITY * 2);
/// assert_eq!(Label::new(&long).as_str().len(), LABEL_CAPACITY - 1);
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(C)]
pub struct Label {
    bytes: [u8; LABEL_CAPACITY],
}

impl Label {
    /// Creates a label from a string, truncating it to fit into [`LABEL_CAPACITY`].
    ///
    /// Truncation never splits a multi-byte character and the stored label is always
    /// nul-terminated within the capacity boundary.
    #[must_use]
    pub fn new(value: &str) -> Self {
        let mut end = value.len().min(LABEL_CAPACITY.wrapping_sub(1));

        while !value.is_char_boundary(end) {
            // Index 0 is always a char boundary, so this cannot underflow.
            end = end.wrapping_sub(1);
        }

        let source = value.as_bytes().get(..end).unwrap_or_default();

        let mut bytes = [0_u8; LABEL_CAPACITY];
        if let Some(target) = bytes.get_mut(..end) {
            target.copy_from_slice(source);
        }

        Self { bytes }
    }

    /// Returns the label as a string slice, without the terminating nul byte.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self
            .bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(LABEL_CAPACITY);
        let bytes = self.bytes.get(..len).unwrap_or_default();

        // A label read back from a damaged header may contain anything. We show the valid prefix.
        match std::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(bytes.get(..e.valid_up_to()).unwrap_or_default())
                .unwrap_or_default(),
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Self {
            bytes: [0; LABEL_CAPACITY],
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Metadata block physically prefixed to the payload of every tracked allocation.
///
/// Every tracked block is laid out as `[AllocationHeader][payload]`. The header identifies
/// the owning record via its key in the record table of the tracker, which is how a raw
/// data pointer is resolved back to its record.
#[derive(Clone, Copy, Debug)]
#[repr(C, align(16))]
pub(crate) struct AllocationHeader {
    pub(crate) record: RecordKey,
    pub(crate) label: Label,
}

impl AllocationHeader {
    pub(crate) fn new(record: RecordKey, label: Label) -> Self {
        Self { record, label }
    }

    /// Computes the address where the header of a tracked data pointer would be located.
    ///
    /// This is pure address arithmetic and never touches memory.
    pub(crate) fn address_of(data: NonNull<u8>) -> usize {
        data.as_ptr().addr().wrapping_sub(HEADER_SIZE)
    }

    /// Reads the header that precedes a data pointer.
    ///
    /// The read is unaligned because the pointer may be a corrupted or offset one, in which case
    /// the result is garbage that the caller is expected to validate against the record table.
    ///
    /// # Safety
    ///
    /// The `HEADER_SIZE` bytes immediately before `data` must be readable.
    pub(crate) unsafe fn read_before(data: NonNull<u8>) -> Self {
        let header_ptr = data.as_ptr().wrapping_sub(HEADER_SIZE).cast::<Self>();

        // SAFETY: Forwarding the readability requirement to the caller. Any bit pattern is a
        // valid `AllocationHeader` (integers and bytes only) and we do not assume alignment.
        unsafe { header_ptr.read_unaligned() }
    }

    /// Writes a header to the start of a freshly allocated block.
    ///
    /// # Safety
    ///
    /// `block` must be valid for writes of `HEADER_SIZE` bytes and aligned to
    /// [`ALLOCATION_ALIGNMENT`].
    pub(crate) unsafe fn write_to(self, block: NonNull<Self>) {
        // SAFETY: Forwarding the validity and alignment requirements to the caller.
        unsafe { block.write(self) }
    }
}
