//! Per-tracker slot map that resolves record keys to records and threads the live records
//! of the tracker into an intrusive doubly-linked list.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use crate::constants::{ERR_POISONED_LOCK, ERR_SLOT_OUT_OF_BOUNDS};
use crate::header::RecordKey;
use crate::record::RecordInner;
use crate::{MemorySpace, RecordSummary};

/// Index of the sentinel slot that roots the live list. It never holds a record.
const SENTINEL: u32 = 0;

#[derive(Debug)]
struct Slot<S: MemorySpace> {
    generation: u32,

    /// Resolves the key of the slot to its record for as long as anything keeps the record alive.
    record: Option<Weak<RecordInner<S>>>,

    /// Keeps the record alive while its reference count is above zero, even if no handle
    /// to it exists anymore (e.g. only a raw data pointer is held by the caller).
    owner: Option<Arc<RecordInner<S>>>,

    /// Neighbors in the live list. A slot that is not linked points to itself.
    prev: u32,
    next: u32,

    linked: bool,
}

impl<S: MemorySpace> Slot<S> {
    fn vacant(index: u32) -> Self {
        Self {
            generation: 0,
            record: None,
            owner: None,
            prev: index,
            next: index,
            linked: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TableState<S: MemorySpace> {
    slots: Vec<Slot<S>>,

    /// Indexes of slots that can be reused, in LIFO order.
    free: Vec<u32>,

    linked_count: usize,
}

/// Slot map of all records of one tracker.
///
/// Every mutation happens under a single lock. The lock is only ever held for slot and list
/// bookkeeping - never while calling into a memory space, a destroy functor or a profiling
/// sink, and never while the last strong reference to a record could be dropped.
#[derive(Debug)]
pub(crate) struct RecordTable<S: MemorySpace> {
    state: Mutex<TableState<S>>,
}

impl<S: MemorySpace> RecordTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                slots: vec![Slot::vacant(SENTINEL)],
                free: Vec::new(),
                linked_count: 0,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TableState<S>> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }

    /// Reserves a slot for a record that is about to be created.
    ///
    /// The slot resolves to nothing until [`publish()`][TableState::publish] is called.
    pub(crate) fn reserve(&self) -> RecordKey {
        self.lock().reserve()
    }

    /// Resolves a key to its record, if the key is current and the record is still alive.
    pub(crate) fn lookup(&self, key: RecordKey) -> Option<Arc<RecordInner<S>>> {
        // The upgraded record leaves the lock scope before anyone can drop it.
        let state = self.lock();
        state.lookup(key)
    }
}

impl<S: MemorySpace> TableState<S> {
    fn slot(&self, index: u32) -> &Slot<S> {
        self.slots.get(index as usize).expect(ERR_SLOT_OUT_OF_BOUNDS)
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot<S> {
        self.slots
            .get_mut(index as usize)
            .expect(ERR_SLOT_OUT_OF_BOUNDS)
    }

    fn reserve(&mut self) -> RecordKey {
        if let Some(index) = self.free.pop() {
            let generation = self.slot(index).generation;
            return RecordKey { index, generation };
        }

        let index = u32::try_from(self.slots.len())
            .expect("a tracker cannot hold more than u32::MAX records at the same time");
        self.slots.push(Slot::vacant(index));

        RecordKey {
            index,
            generation: 0,
        }
    }

    /// Makes a reserved slot resolve to the given record.
    pub(crate) fn publish(&mut self, key: RecordKey, record: &Arc<RecordInner<S>>) {
        let slot = self.slot_mut(key.index);
        debug_assert_eq!(slot.generation, key.generation);
        debug_assert!(slot.record.is_none());

        slot.record = Some(Arc::downgrade(record));
    }

    fn lookup(&self, key: RecordKey) -> Option<Arc<RecordInner<S>>> {
        if key.index == SENTINEL {
            return None;
        }

        let slot = self.slots.get(key.index as usize)?;

        if slot.generation != key.generation {
            return None;
        }

        slot.record.as_ref()?.upgrade()
    }

    /// Takes ownership of a record whose reference count just became nonzero and,
    /// if requested, appends it to the tail of the live list.
    pub(crate) fn activate(&mut self, key: RecordKey, record: Arc<RecordInner<S>>, link: bool) {
        let slot = self.slot_mut(key.index);
        debug_assert_eq!(slot.generation, key.generation);
        debug_assert!(slot.owner.is_none());

        slot.owner = Some(record);

        if link {
            self.link(key.index);
            debug!(record = %key, live = self.linked_count, "record linked");
        }
    }

    /// Removes a record whose reference count just became zero from the table, unlinking
    /// it from the live list if it is linked, and frees its slot for reuse.
    ///
    /// Returns the owning reference so the caller can drop it after releasing the lock.
    #[must_use]
    pub(crate) fn retire(&mut self, key: RecordKey) -> Option<Arc<RecordInner<S>>> {
        if self.slot(key.index).linked {
            self.unlink(key.index);
            debug!(record = %key, live = self.linked_count, "record unlinked");
        }

        let owner = self.slot_mut(key.index).owner.take();
        self.vacate(key);
        owner
    }

    /// Frees the slot of a record that is going away without ever having been activated.
    pub(crate) fn vacate(&mut self, key: RecordKey) {
        let slot = self.slot_mut(key.index);

        if slot.generation != key.generation {
            return;
        }

        debug_assert!(!slot.linked);
        debug_assert!(slot.owner.is_none());

        slot.record = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
    }

    fn link(&mut self, index: u32) {
        let tail = self.slot(SENTINEL).prev;

        {
            let slot = self.slot_mut(index);
            debug_assert!(!slot.linked);

            slot.prev = tail;
            slot.next = SENTINEL;
            slot.linked = true;
        }

        self.slot_mut(tail).next = index;
        self.slot_mut(SENTINEL).prev = index;

        self.linked_count = self
            .linked_count
            .checked_add(1)
            .expect("live record count cannot exceed the number of slots");
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = self.slot_mut(index);
            let neighbors = (slot.prev, slot.next);

            slot.prev = index;
            slot.next = index;
            slot.linked = false;

            neighbors
        };

        self.slot_mut(prev).next = next;
        self.slot_mut(next).prev = prev;

        self.linked_count = self
            .linked_count
            .checked_sub(1)
            .expect("unlinked a record from an empty live list - the list is corrupted");
    }

    pub(crate) fn linked_count(&self) -> usize {
        self.linked_count
    }

    /// Walks the live list from oldest to newest link without modifying anything.
    ///
    /// # Panics
    ///
    /// Panics if the list structure is inconsistent (a broken back link, a slot that is
    /// linked but has no owner, or a cycle that does not return to the sentinel).
    pub(crate) fn summarize_live(&self) -> Vec<RecordSummary> {
        let mut summaries = Vec::with_capacity(self.linked_count);

        let mut previous = SENTINEL;
        let mut current = self.slot(SENTINEL).next;

        while current != SENTINEL {
            assert!(
                summaries.len() < self.linked_count,
                "live record list has more entries than records were linked - the list is corrupted"
            );

            let slot = self.slot(current);
            assert_eq!(
                slot.prev, previous,
                "live record list back link does not match forward link - the list is corrupted"
            );

            let record = slot
                .owner
                .as_ref()
                .expect("linked record slot has no owner - the list is corrupted");

            summaries.push(record.summary());

            previous = current;
            current = slot.next;
        }

        assert_eq!(
            summaries.len(),
            self.linked_count,
            "live record list has fewer entries than records were linked - the list is corrupted"
        );

        summaries
    }
}
