use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::view::visit_const;
use crate::{Access, ConstViewHolder, MemorySpace, TrackedBuffer, ViewHolder, ViewRef};

type MutatingFn = dyn Fn(&mut dyn ViewHolder) + Send + Sync;
type ConstFn = dyn Fn(&dyn ConstViewHolder) + Send + Sync;
type MutatingCopyFn = dyn Fn(&mut dyn ViewHolder, &dyn ConstViewHolder) + Send + Sync;
type ConstCopyFn = dyn Fn(&dyn ConstViewHolder, &dyn ConstViewHolder) + Send + Sync;

// `ArcSwapOption` needs a sized payload, so each slot holds a boxed callback.
struct Callback<F: ?Sized>(Box<F>);

#[derive(Default)]
struct HookSlots {
    mutating: ArcSwapOption<Callback<MutatingFn>>,
    constant: ArcSwapOption<Callback<ConstFn>>,
    mutating_copy: ArcSwapOption<Callback<MutatingCopyFn>>,
    const_copy: ArcSwapOption<Callback<ConstCopyFn>>,
}

/// Observer hooks that let external code inspect tracked buffers whenever instrumented code
/// exposes them, without the allocation layer knowing who is listening.
///
/// There is one slot for each of four callbacks:
///
/// * a mutating-view callback, invoked for buffers with mutable elements,
/// * a const-view callback, invoked for buffers with immutable elements,
/// * a mutating-copy callback, invoked for copies into buffers with mutable elements,
/// * a const-copy callback, invoked for copies into buffers with immutable elements.
///
/// Installing a callback replaces whatever was installed in the same slot before. Calls for
/// which no matching callback is installed do nothing.
///
/// This type acts as a cloneable handle to shared hook state. A clone is typically handed to
/// a [`Tracker`][crate::Tracker] when it is built, after which installing callbacks through any
/// handle affects every buffer of that tracker.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use tracked_alloc::{HostSpace, TrackedBuffer, Tracker, ViewHooks};
///
/// let hooks = ViewHooks::new();
/// let tracker = Tracker::builder(HostSpace::new())
///     .hooks(hooks.clone())
///     .build();
///
/// let seen_bytes = Arc::new(AtomicUsize::new(0));
/// let seen_bytes_clone = Arc::clone(&seen_bytes);
/// hooks.set_mutating(move |view| {
///     seen_bytes_clone.fetch_add(view.span_bytes(), Ordering::Relaxed);
/// });
///
/// let mut buffer = TrackedBuffer::new(&tracker, "samples", 16, 0.0_f64).unwrap();
/// hooks.call(&mut buffer);
///
/// // Once when the buffer was created, once by the explicit call.
/// assert_eq!(seen_bytes.load(Ordering::Relaxed), 2 * 16 * 8);
/// ```
#[derive(Clone, Default)]
pub struct ViewHooks {
    slots: Arc<HookSlots>,
}

impl ViewHooks {
    /// Creates a hook registry with no callbacks installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs both single-buffer callbacks, replacing any previously installed ones.
    pub fn set<M, C>(&self, mutating: M, constant: C)
    where
        M: Fn(&mut dyn ViewHolder) + Send + Sync + 'static,
        C: Fn(&dyn ConstViewHolder) + Send + Sync + 'static,
    {
        self.set_mutating(mutating);
        self.set_const(constant);
    }

    /// Installs the callback invoked for buffers with mutable elements.
    pub fn set_mutating<M>(&self, mutating: M)
    where
        M: Fn(&mut dyn ViewHolder) + Send + Sync + 'static,
    {
        debug!("installing mutating view hook");
        self.slots
            .mutating
            .store(Some(Arc::new(Callback(Box::new(mutating)))));
    }

    /// Installs the callback invoked for buffers with immutable elements.
    pub fn set_const<C>(&self, constant: C)
    where
        C: Fn(&dyn ConstViewHolder) + Send + Sync + 'static,
    {
        debug!("installing const view hook");
        self.slots
            .constant
            .store(Some(Arc::new(Callback(Box::new(constant)))));
    }

    /// Installs both copy callbacks, replacing any previously installed ones.
    pub fn set_copy<M, C>(&self, mutating_copy: M, const_copy: C)
    where
        M: Fn(&mut dyn ViewHolder, &dyn ConstViewHolder) + Send + Sync + 'static,
        C: Fn(&dyn ConstViewHolder, &dyn ConstViewHolder) + Send + Sync + 'static,
    {
        self.set_mutating_copy(mutating_copy);
        self.set_const_copy(const_copy);
    }

    /// Installs the callback invoked for copies into buffers with mutable elements.
    ///
    /// The callback receives the destination view first and the source view second.
    pub fn set_mutating_copy<M>(&self, mutating_copy: M)
    where
        M: Fn(&mut dyn ViewHolder, &dyn ConstViewHolder) + Send + Sync + 'static,
    {
        debug!("installing mutating copy hook");
        self.slots
            .mutating_copy
            .store(Some(Arc::new(Callback(Box::new(mutating_copy)))));
    }

    /// Installs the callback invoked for copies into buffers with immutable elements.
    ///
    /// The callback receives the destination view first and the source view second.
    pub fn set_const_copy<C>(&self, const_copy: C)
    where
        C: Fn(&dyn ConstViewHolder, &dyn ConstViewHolder) + Send + Sync + 'static,
    {
        debug!("installing const copy hook");
        self.slots
            .const_copy
            .store(Some(Arc::new(Callback(Box::new(const_copy)))));
    }

    /// Removes all installed callbacks.
    pub fn clear(&self) {
        debug!("clearing view hooks");
        self.slots.mutating.store(None);
        self.slots.constant.store(None);
        self.slots.mutating_copy.store(None);
        self.slots.const_copy.store(None);
    }

    /// Whether at least one callback is currently installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slots.mutating.load().is_some()
            || self.slots.constant.load().is_some()
            || self.slots.mutating_copy.load().is_some()
            || self.slots.const_copy.load().is_some()
    }

    /// Exposes a buffer to the installed single-buffer callback matching its element mutability.
    ///
    /// Buffers with mutable elements go to the mutating callback, buffers with immutable
    /// elements go to the const callback. If the matching callback is not installed,
    /// nothing happens.
    pub fn call<T, S, A>(&self, buffer: &mut TrackedBuffer<T, S, A>)
    where
        T: Copy + Send + Sync,
        S: MemorySpace,
        A: Access,
    {
        A::visit(buffer, |view| self.dispatch(view));
    }

    /// Exposes a copy operation between two buffers to the installed callbacks.
    ///
    /// The source is first exposed to the single-buffer callback matching its element
    /// mutability, so a listener always sees the read. Then the copy callback matching the
    /// element mutability of the destination receives the destination and source views.
    pub fn call_copy<T, DS, DA, SS, SA>(
        &self,
        dst: &mut TrackedBuffer<T, DS, DA>,
        src: &mut TrackedBuffer<T, SS, SA>,
    ) where
        T: Copy + Send + Sync,
        DS: MemorySpace,
        DA: Access,
        SS: MemorySpace,
        SA: Access,
    {
        self.call(src);
        self.call_copy_pair(dst, src);
    }

    /// Exposes the destination and source of a copy to the copy callback matching the element
    /// mutability of the destination, without exposing the source on its own.
    pub(crate) fn call_copy_pair<T, DS, DA, SS, SA>(
        &self,
        dst: &mut TrackedBuffer<T, DS, DA>,
        src: &TrackedBuffer<T, SS, SA>,
    ) where
        T: Copy + Send + Sync,
        DS: MemorySpace,
        DA: Access,
        SS: MemorySpace,
        SA: Access,
    {
        DA::visit(dst, |dst_view| {
            visit_const(src, |src_view| self.dispatch_copy(dst_view, src_view));
        });
    }

    fn dispatch(&self, view: ViewRef<'_>) {
        match view {
            ViewRef::Mutable(view) => {
                if let Some(callback) = self.slots.mutating.load_full() {
                    (callback.0)(view);
                }
            }
            ViewRef::Const(view) => {
                if let Some(callback) = self.slots.constant.load_full() {
                    (callback.0)(view);
                }
            }
        }
    }

    fn dispatch_copy(&self, dst: ViewRef<'_>, src: &dyn ConstViewHolder) {
        match dst {
            ViewRef::Mutable(dst) => {
                if let Some(callback) = self.slots.mutating_copy.load_full() {
                    (callback.0)(dst, src);
                }
            }
            ViewRef::Const(dst) => {
                if let Some(callback) = self.slots.const_copy.load_full() {
                    (callback.0)(dst, src);
                }
            }
        }
    }
}

impl fmt::Debug for ViewHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHooks")
            .field("mutating", &self.slots.mutating.load().is_some())
            .field("constant", &self.slots.constant.load().is_some())
            .field("mutating_copy", &self.slots.mutating_copy.load().is_some())
            .field("const_copy", &self.slots.const_copy.load().is_some())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{HostSpace, Tracker, TrackingMode};

    assert_impl_all!(ViewHooks: Send, Sync, Clone);

    fn tracker() -> Tracker<HostSpace> {
        Tracker::builder(HostSpace::new())
            .tracking(TrackingMode::Enabled)
            .build()
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&counter), counter)
    }

    #[test]
    fn new_hooks_are_not_set() {
        let hooks = ViewHooks::new();
        assert!(!hooks.is_set());
    }

    #[test]
    fn any_single_slot_makes_hooks_set() {
        let hooks = ViewHooks::new();
        hooks.set_const_copy(|_, _| {});
        assert!(hooks.is_set());

        hooks.clear();
        assert!(!hooks.is_set());

        hooks.set_mutating(|_| {});
        assert!(hooks.is_set());
    }

    #[test]
    fn clear_removes_all_callbacks() {
        let hooks = ViewHooks::new();
        hooks.set(|_| {}, |_| {});
        hooks.set_copy(|_, _| {}, |_, _| {});

        hooks.clear();
        assert!(!hooks.is_set());
    }

    #[test]
    fn mutable_buffer_goes_to_mutating_callback() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "mutable", 4, 1_u32).unwrap();

        let hooks = ViewHooks::new();
        let (mutating_calls, mutating_seen) = counter();
        let (const_calls, const_seen) = counter();
        hooks.set(
            move |view| {
                assert!(!view.is_immutable());
                assert_eq!(view.span(), 4);
                assert_eq!(view.element_size(), 4);
                assert!(view.span_is_contiguous());
                assert_eq!(view.label(), "mutable");
                mutating_calls.fetch_add(1, Ordering::Relaxed);
            },
            move |_| {
                const_calls.fetch_add(1, Ordering::Relaxed);
            },
        );

        hooks.call(&mut buffer);

        assert_eq!(mutating_seen.load(Ordering::Relaxed), 1);
        assert_eq!(const_seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn immutable_buffer_goes_to_const_callback() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "immutable", 3, 2_u16)
            .unwrap()
            .into_read_only();

        let hooks = ViewHooks::new();
        let (mutating_calls, mutating_seen) = counter();
        let (const_calls, const_seen) = counter();
        hooks.set(
            move |_| {
                mutating_calls.fetch_add(1, Ordering::Relaxed);
            },
            move |view| {
                assert!(view.is_immutable());
                assert_eq!(view.span_bytes(), 6);
                const_calls.fetch_add(1, Ordering::Relaxed);
            },
        );

        hooks.call(&mut buffer);

        assert_eq!(mutating_seen.load(Ordering::Relaxed), 0);
        assert_eq!(const_seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn only_mutating_installed_ignores_immutable_buffer() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "ro", 2, 0_u8)
            .unwrap()
            .into_read_only();

        let hooks = ViewHooks::new();
        let (calls, seen) = counter();
        hooks.set_mutating(move |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });

        hooks.call(&mut buffer);

        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn only_const_installed_ignores_mutable_buffer() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "rw", 2, 0_u8).unwrap();

        let hooks = ViewHooks::new();
        let (calls, seen) = counter();
        hooks.set_const(move |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });

        hooks.call(&mut buffer);

        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn mutating_callback_can_write_through_view() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "writable", 4, 0_u8).unwrap();

        let hooks = ViewHooks::new();
        hooks.set_mutating(|view| {
            let len = view.span_bytes();
            // SAFETY: The view covers `len` bytes of mutable elements.
            unsafe { view.data_mut().write_bytes(7, len) };
        });

        hooks.call(&mut buffer);

        assert_eq!(buffer.as_slice(), &[7, 7, 7, 7]);
    }

    #[test]
    fn installing_replaces_previous_callback() {
        let tracker = tracker();
        let mut buffer = TrackedBuffer::new(&tracker, "replace", 1, 0_u8).unwrap();

        let hooks = ViewHooks::new();
        let (first_calls, first_seen) = counter();
        let (second_calls, second_seen) = counter();
        hooks.set_mutating(move |_| {
            first_calls.fetch_add(1, Ordering::Relaxed);
        });
        hooks.set_mutating(move |_| {
            second_calls.fetch_add(1, Ordering::Relaxed);
        });

        hooks.call(&mut buffer);

        assert_eq!(first_seen.load(Ordering::Relaxed), 0);
        assert_eq!(second_seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn copy_sees_source_read_then_pair() {
        let tracker = tracker();
        let mut dst = TrackedBuffer::new(&tracker, "dst", 2, 0_i32).unwrap();
        let mut src = TrackedBuffer::new(&tracker, "src", 2, 5_i32)
            .unwrap()
            .into_read_only();

        let events = Arc::new(Mutex::new(Vec::new()));

        let hooks = ViewHooks::new();
        let single_events = Arc::clone(&events);
        hooks.set_const(move |view| {
            single_events
                .lock()
                .unwrap()
                .push(format!("read {}", view.label()));
        });
        let copy_events = Arc::clone(&events);
        hooks.set_mutating_copy(move |dst_view, src_view| {
            assert!(!dst_view.is_immutable());
            assert!(src_view.is_immutable());
            copy_events
                .lock()
                .unwrap()
                .push(format!("copy {} <- {}", dst_view.label(), src_view.label()));
        });

        hooks.call_copy(&mut dst, &mut src);

        assert_eq!(
            *events.lock().unwrap(),
            vec!["read src".to_string(), "copy dst <- src".to_string()]
        );
    }

    #[test]
    fn copy_into_immutable_goes_to_const_copy_callback() {
        let tracker = tracker();
        let mut dst = TrackedBuffer::new(&tracker, "dst", 1, 0_u64)
            .unwrap()
            .into_read_only();
        let mut src = TrackedBuffer::new(&tracker, "src", 1, 0_u64).unwrap();

        let hooks = ViewHooks::new();
        let (mutating_calls, mutating_seen) = counter();
        let (const_calls, const_seen) = counter();
        hooks.set_copy(
            move |_, _| {
                mutating_calls.fetch_add(1, Ordering::Relaxed);
            },
            move |dst_view, src_view| {
                assert!(dst_view.is_immutable());
                assert!(!src_view.is_immutable());
                const_calls.fetch_add(1, Ordering::Relaxed);
            },
        );

        hooks.call_copy(&mut dst, &mut src);

        assert_eq!(mutating_seen.load(Ordering::Relaxed), 0);
        assert_eq!(const_seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn debug_shows_installed_slots() {
        let hooks = ViewHooks::new();
        hooks.set_const(|_| {});

        let debug = format!("{hooks:?}");
        assert!(debug.contains("constant: true"));
        assert!(debug.contains("mutating: false"));
    }
}
