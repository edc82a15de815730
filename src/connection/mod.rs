//! Connection Handling Module
//!
//! This module defines how the server talks to protocols, and ships the
//! reference protocol used to exercise it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server (accept loop)                    │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ spawn one task per connection
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Handler::handle(ctx, stream)                      │
//! │                                                             │
//! │   EchoHandler:  registry ── EchoClient ── DrainWait         │
//! └─────────────────────────────────────────────────────────────┘
//!                        ▲
//!                        │ Handler::close() once, on shutdown
//! ```
//!
//! - [`handler`]: the [`Handler`] trait and the per-connection types
//! - [`echo`]: [`EchoHandler`], a line echo protocol

pub mod echo;
pub mod handler;

// Re-export commonly used types
pub use echo::{EchoClient, EchoHandler, DEFAULT_GRACE_PERIOD};
pub use handler::{ConnectionContext, ConnectionError, ConnectionId, Handler, HandlerError};
