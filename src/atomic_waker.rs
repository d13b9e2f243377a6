//! Atomic waker abstraction, uses critical section.
//!
//! A single task waits on the transmit line (for space or for the drain) and the interrupt
//! handler wakes it.

use core::{cell::UnsafeCell, task::Waker};

/// Holds the waker of the one task waiting on a [`crate::LineState`].
pub struct AtomicWaker {
    waker: UnsafeCell<Option<Waker>>,
}

// SAFETY: We protect the `UnsafeCell` with critical sections.
unsafe impl Send for AtomicWaker {}
// SAFETY: We protect the `UnsafeCell` with critical sections.
unsafe impl Sync for AtomicWaker {}

impl AtomicWaker {
    /// Create a new atomic waker.
    pub const fn new() -> Self {
        Self {
            waker: UnsafeCell::new(None),
        }
    }

    /// Register a waker. Replaces the previous one unless both wake the same task.
    pub fn register(&self, new_waker: &Waker) {
        critical_section::with(|_| {
            // SAFETY: We are in a critical section and hold no other reference to `self.waker`.
            let slot = unsafe { &mut *self.waker.get() };
            match slot {
                Some(w) if w.will_wake(new_waker) => {}
                _ => *slot = Some(new_waker.clone()),
            }
        });
    }

    /// Wake the registered waker, if any.
    ///
    /// Called from interrupt context. The waker is woken after the critical section ends.
    pub fn wake(&self) {
        // SAFETY: We are in a critical section and hold no other reference to `self.waker`.
        if let Some(w) = critical_section::with(|_| unsafe { &mut *self.waker.get() }.take()) {
            w.wake();
        }
    }
}
