#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing, benchmarks and examples in `tracked_alloc`.

use std::panic;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs a test on a separate thread and fails it if it does not finish in time.
///
/// Multithreaded tests of reference counting and list maintenance deadlock rather than fail
/// when a lock is taken twice, so they run under a watchdog to keep a hang from stalling the
/// whole test run.
///
/// The timeout is 10 seconds, or 60 seconds under Miri. When the `MUTATION_TESTING`
/// environment variable is set to "1", the watchdog is disabled and the test runs directly
/// on the calling thread, so that mutation testing can detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout. A panic inside the test is propagated as is.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let sum = with_watchdog(|| (1..=10).sum::<u32>());
/// assert_eq!(sum, 55);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_thread = thread::spawn(move || {
        // The receiver is gone if we already timed out, nobody to tell.
        drop(tx.send(test_fn()));
    });

    let timeout = watchdog_timeout();

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_thread
                .join()
                .expect("test thread finished its work, so it cannot panic anymore");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {timeout:?} - it is probably deadlocked");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_thread.join() {
            Ok(()) => panic!("test thread exited without producing a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg_attr(test, mutants::skip)] // Only affects how long we wait for a hang.
fn watchdog_timeout() -> Duration {
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}

/// The byte at `index` of the deterministic test pattern identified by `seed`.
///
/// The pattern does not repeat with a period that is a power of two, so a copy that is
/// shifted by a small power-of-two offset does not reproduce it by accident.
#[must_use]
pub fn pattern_byte(index: usize, seed: u8) -> u8 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the remainder is always below 251"
    )]
    let position = (index % 251) as u8;

    position.wrapping_add(seed)
}

/// Returns `len` bytes of the test pattern identified by `seed`.
#[must_use]
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|index| pattern_byte(index, seed)).collect()
}

/// Writes `len` bytes of the test pattern identified by `seed` to `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes.
pub unsafe fn fill_pattern(ptr: *mut u8, len: usize, seed: u8) {
    for index in 0..len {
        // SAFETY: Forwarding the caller's guarantee that `len` bytes are writable.
        unsafe { ptr.add(index).write(pattern_byte(index, seed)) };
    }
}

/// Returns the index of the first of `len` bytes at `ptr` that does not match the test pattern
/// identified by `seed`, or `None` if all of them match.
///
/// # Safety
///
/// `ptr` must be valid for reads of `len` bytes.
#[must_use]
pub unsafe fn find_pattern_mismatch(ptr: *const u8, len: usize, seed: u8) -> Option<usize> {
    (0..len).find(|&index| {
        // SAFETY: Forwarding the caller's guarantee that `len` bytes are readable.
        let actual = unsafe { ptr.add(index).read() };
        actual != pattern_byte(index, seed)
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_result() {
        assert_eq!(with_watchdog(|| 42), 42);
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic]
    fn watchdog_propagates_panic() {
        with_watchdog(|| panic!("boom"));
    }

    #[test]
    fn pattern_depends_on_seed_and_index() {
        assert_ne!(pattern(16, 0), pattern(16, 1));
        assert_ne!(pattern_byte(0, 0), pattern_byte(1, 0));
        assert_eq!(pattern_byte(251, 7), pattern_byte(0, 7));
    }

    #[test]
    fn fill_then_find_no_mismatch() {
        let mut bytes = vec![0_u8; 300];

        // SAFETY: The vector is 300 bytes long.
        unsafe {
            fill_pattern(bytes.as_mut_ptr(), 300, 3);
            assert_eq!(find_pattern_mismatch(bytes.as_ptr(), 300, 3), None);
        }

        assert_eq!(bytes, pattern(300, 3));
    }

    #[test]
    fn mismatch_is_located() {
        let mut bytes = pattern(64, 9);
        bytes[40] = bytes[40].wrapping_add(1);

        // SAFETY: The vector is 64 bytes long.
        let mismatch = unsafe { find_pattern_mismatch(bytes.as_ptr(), 64, 9) };
        assert_eq!(mismatch, Some(40));
    }
}
