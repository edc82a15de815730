//! Bounded Drain Wait
//!
//! A [`DrainWait`] counts operations that are still in flight and lets a
//! task wait until the count returns to zero. Unlike a plain wait group it
//! also offers [`DrainWait::wait_with_timeout`], which bounds how long
//! shutdown can be held up by a single slow operation.
//!
//! ## How It Works
//!
//! The counter lives inside a `tokio::sync::watch` channel. Every change is
//! published to subscribers, and a waiter simply subscribes and waits for a
//! value of zero:
//!
//! ```text
//!   add(n) ──> count += n ──┐
//!                           ├──> watch ──> wait(): resolves when count == 0
//!   done() ──> count -= 1 ──┘
//! ```
//!
//! A timed-out waiter is just a dropped future, so nothing is left behind
//! when the count reaches zero later.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Misuse of a [`DrainWait`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// `done` was called more times than `add` accounted for
    #[error("done called with no outstanding operations")]
    Underflow,
}

/// A counting wait primitive with an optional deadline.
#[derive(Debug)]
pub struct DrainWait {
    count: watch::Sender<usize>,
}

impl DrainWait {
    /// Creates a wait with no outstanding operations.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Registers `n` more in-flight operations.
    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.count.send_modify(|count| *count += n);
    }

    /// Marks one operation as finished.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding operation. An unmatched `done` is a
    /// bug in the caller and is never silently absorbed.
    #[track_caller]
    pub fn done(&self) {
        if let Err(e) = self.try_done() {
            panic!("DrainWait::done: {e}");
        }
    }

    /// Fallible form of [`done`](Self::done).
    ///
    /// The counter is left untouched when this returns an error.
    pub fn try_done(&self) -> Result<(), WaitError> {
        let decremented = self.count.send_if_modified(|count| match count.checked_sub(1) {
            Some(next) => {
                *count = next;
                true
            }
            None => false,
        });

        if decremented {
            Ok(())
        } else {
            Err(WaitError::Underflow)
        }
    }

    /// Returns the number of outstanding operations.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Waits until every outstanding operation has finished.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Waits until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` if the timeout fired first.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_err()
    }
}

impl Default for DrainWait {
    fn default() -> Self {
        Self::new()
    }
}
