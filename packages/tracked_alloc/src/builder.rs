use std::sync::Arc;

use crate::{MemorySpace, ProfilingSink, Tracker, TrackingMode, ViewHooks};

/// Builder for creating an instance of [`Tracker`].
///
/// # Examples
///
/// ```
/// use tracked_alloc::{HostSpace, Tracker, TrackingMode};
///
/// // Default tracker.
/// let tracker = Tracker::builder(HostSpace::new()).build();
///
/// // Without a live record list.
/// let tracker = Tracker::builder(HostSpace::new())
///     .tracking(TrackingMode::Disabled)
///     .build();
/// # let _ = tracker;
/// ```
#[derive(Debug)]
#[must_use]
pub struct TrackerBuilder<S: MemorySpace> {
    space: S,
    mode: TrackingMode,
    hooks: ViewHooks,
    sink: Option<Arc<dyn ProfilingSink>>,
}

impl<S: MemorySpace> TrackerBuilder<S> {
    pub(crate) fn new(space: S) -> Self {
        Self {
            space,
            mode: TrackingMode::default(),
            hooks: ViewHooks::default(),
            sink: None,
        }
    }

    /// Sets the [tracking mode][TrackingMode], which governs whether the tracker keeps a list
    /// of its live allocations for diagnostics.
    pub fn tracking(mut self, mode: TrackingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the observer hooks that instrumented code working with the tracker's allocations
    /// calls. Pass a clone of a [`ViewHooks`] handle to keep installing callbacks through it.
    ///
    /// By default, the tracker gets its own empty hooks.
    pub fn hooks(mut self, hooks: ViewHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the profiling sink that is notified of every tracked allocation and deallocation.
    pub fn profiling_sink(mut self, sink: Arc<dyn ProfilingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the tracker with the specified configuration.
    #[must_use]
    pub fn build(self) -> Tracker<S> {
        Tracker::from_parts(self.space, self.mode, self.hooks, self.sink)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{HostSpace, PoolSpace};

    #[test]
    fn defaults() {
        let tracker = Tracker::builder(HostSpace::new()).build();

        assert_eq!(tracker.tracking_mode(), TrackingMode::default());
        assert!(!tracker.hooks().is_set());
    }

    #[test]
    fn shared_hooks_are_visible_through_tracker() {
        let hooks = ViewHooks::new();
        let tracker = Tracker::builder(PoolSpace::new())
            .hooks(hooks.clone())
            .build();

        hooks.set_const(|_| {});
        assert!(tracker.hooks().is_set());

        tracker.hooks().clear();
        assert!(!hooks.is_set());
    }

    #[test]
    fn explicit_mode_is_used() {
        let tracker = Tracker::builder(HostSpace::new())
            .tracking(TrackingMode::Disabled)
            .build();

        assert_eq!(tracker.tracking_mode(), TrackingMode::Disabled);
    }
}
