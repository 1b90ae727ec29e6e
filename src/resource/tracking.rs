//! Reverse tracking from a resource back to the command buffers currently
//! holding a strong reference to it, without a strong reference cycle.
//!
//! A resource owns a small set of [`Weak`] pointers to any command buffer
//! that called `hold_*` on it; `in_use()` polls the set and drops entries
//! whose command buffer has already been freed or finished.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// One command buffer's notion of "am I still doing something with this
/// resource"; implemented by `CommandBuffer` itself.
pub trait InFlightMarker {
    fn still_in_flight(&self) -> bool;
}

/// A set of weak references to command buffers currently holding this
/// resource.
#[derive(Default)]
pub struct ResourceTracking<C: InFlightMarker> {
    holders: Mutex<Vec<Weak<C>>>,
}

impl<C: InFlightMarker> ResourceTracking<C> {
    pub fn new() -> Self {
        Self { holders: Mutex::new(Vec::new()) }
    }

    /// Registers a command buffer as currently holding this resource.
    pub fn register(&self, holder: &Arc<C>) {
        self.holders.lock().push(Arc::downgrade(holder));
    }

    /// Whether any registered holder is still alive and in flight. Dead or
    /// finished holders are pruned as a side effect.
    pub fn in_use(&self) -> bool {
        let mut holders = self.holders.lock();
        holders.retain(|w| w.upgrade().is_some_and(|cb| cb.still_in_flight()));
        !holders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHolder {
        in_flight: std::sync::atomic::AtomicBool,
    }
    impl InFlightMarker for FakeHolder {
        fn still_in_flight(&self) -> bool {
            self.in_flight.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn in_use_reflects_live_in_flight_holder() {
        let tracking: ResourceTracking<FakeHolder> = ResourceTracking::new();
        let holder = Arc::new(FakeHolder { in_flight: std::sync::atomic::AtomicBool::new(true) });
        tracking.register(&holder);
        assert!(tracking.in_use());
        holder.in_flight.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(!tracking.in_use());
    }

    #[test]
    fn in_use_false_once_holder_dropped() {
        let tracking: ResourceTracking<FakeHolder> = ResourceTracking::new();
        {
            let holder = Arc::new(FakeHolder { in_flight: std::sync::atomic::AtomicBool::new(true) });
            tracking.register(&holder);
        }
        assert!(!tracking.in_use());
    }
}
