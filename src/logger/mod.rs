//! Logging Module
//!
//! Every component of the server logs through an explicit [`Logger`] handle
//! that it receives at construction. The handle feeds a bounded queue that a
//! single background thread drains in order.
//!
//! ## Line Format
//!
//! ```text
//! 2024/03/09 10:15:00 [INFO][listener.rs:88] tcp server start at 127.0.0.1:6399
//! └──── timestamp ──┘ └lvl┘ └─ caller ───┘  └────────── message ────────────┘
//! ```
//!
//! ## Sinks
//!
//! - **Console**: always written (stdout unless replaced via the builder)
//! - **File**: optional, rotated by a time-based file name template
//!
//! ## Example
//!
//! ```no_run
//! use tidekv::logger::{Logger, LoggerConfig};
//!
//! let logger = Logger::file(LoggerConfig::default())?;
//! logger.info("starting");
//! logger.flush();
//! # Ok::<(), tidekv::logger::LoggerError>(())
//! ```

pub mod files;
pub mod layer;
pub mod level;
pub mod pipeline;

pub use files::{LoggerConfig, LoggerError, RotatingFile};
pub use level::Level;
pub use pipeline::{Caller, Logger, LoggerBuilder, DEFAULT_QUEUE_CAPACITY};
