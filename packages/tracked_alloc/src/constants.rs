// A poisoned lock means the process is in an unrecoverable/unsafe state and must exit (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - continued execution \
    is not safe because we can no longer ensure that the live record list is consistent";

pub(crate) const ERR_SLOT_OUT_OF_BOUNDS: &str =
    "record table slot index out of bounds - the live record list is corrupted";
