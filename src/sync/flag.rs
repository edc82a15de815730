//! Lock-free boolean gate.

use std::sync::atomic::{AtomicBool, Ordering};

/// An atomic boolean with plain load/store semantics.
///
/// There is deliberately no compare-and-swap: callers only ever need to
/// publish a state change and observe it from other tasks.
#[derive(Debug, Default)]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    /// Returns the current value.
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Stores a new value, visible to every subsequent `get`.
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }
}
