//! # TideKV - Server Lifecycle Core
//!
//! TideKV is an in-memory key-value service in the making. This crate holds
//! the part every protocol builds on: accepting connections, running a
//! protocol handler per connection, shutting everything down in order, and
//! logging it all through an ordered background pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TideKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐  spawn   ┌──────────────────┐                          │
//! │  │   Server    │────────> │ Handler::handle  │  one task per connection │
//! │  │ accept loop │          │   (EchoHandler)  │                          │
//! │  └──────┬──────┘          └────────┬─────────┘                          │
//! │         │ signal / fatal error     │ AtomicFlag + DrainWait per client  │
//! │         ▼                          ▼                                    │
//! │  close listener ──> Handler::close() ──> join connection tasks          │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │ Logger: bounded queue ──> consumer thread ──> stdout / log file   │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidekv::{EchoHandler, Logger, Server, ServerConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let logger = Logger::stdout()?;
//!     let handler = Arc::new(EchoHandler::new(logger.clone()));
//!     let server = Server::new(ServerConfig::default(), handler, logger.clone());
//!
//!     let listener = server.bind().await?;
//!     let shutdown = CancellationToken::new();
//!     tokio::spawn({
//!         let shutdown = shutdown.clone();
//!         async move {
//!             let _ = tokio::signal::ctrl_c().await;
//!             shutdown.cancel();
//!         }
//!     });
//!
//!     server.serve(listener, shutdown).await?;
//!     logger.flush();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`sync`]: [`AtomicFlag`] and [`DrainWait`]
//! - [`logger`]: the asynchronous log pipeline
//! - [`connection`]: the [`Handler`] contract and the reference echo protocol
//! - [`server`]: accept loop, signals and shutdown orchestration
//!
//! ## Shutdown Guarantees
//!
//! 1. The listener is closed before [`Handler::close`] runs.
//! 2. [`Handler::close`] runs exactly once.
//! 3. The server returns only after every connection task has finished.

pub mod connection;
pub mod logger;
pub mod server;
pub mod sync;

// Re-export commonly used types for convenience
pub use connection::{ConnectionContext, ConnectionId, EchoHandler, Handler, HandlerError};
pub use logger::{Level, Logger, LoggerConfig, LoggerError};
pub use server::{ConnectionStats, Server, ServerConfig, ServerError};
pub use sync::{AtomicFlag, DrainWait};

/// The default port TideKV listens on
pub const DEFAULT_PORT: u16 = 6399;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
