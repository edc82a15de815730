//! Synchronization Primitives
//!
//! Small building blocks shared by the connection handlers and the server.
//!
//! - [`AtomicFlag`]: a lock-free boolean gate, used to stop admitting new
//!   work once shutdown has begun.
//! - [`DrainWait`]: a counter of in-flight operations that can be awaited,
//!   with or without a deadline.
//!
//! ## Example
//!
//! ```
//! use tidekv::sync::{AtomicFlag, DrainWait};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let closing = AtomicFlag::new(false);
//! let inflight = DrainWait::new();
//!
//! inflight.add(1);
//! // ... do the work ...
//! inflight.done();
//!
//! closing.set(true);
//! assert!(closing.get());
//! assert!(!inflight.wait_with_timeout(Duration::from_millis(10)).await);
//! # });
//! ```

pub mod flag;
pub mod wait;

pub use flag::AtomicFlag;
pub use wait::{DrainWait, WaitError};
