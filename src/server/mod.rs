//! Server Module
//!
//! The TCP front door: binds the listen address, accepts connections, spawns
//! one task per connection and, on shutdown, closes everything in a fixed
//! order.
//!
//! - [`listener`]: [`Server`], its configuration and the accept loop
//! - [`signals`]: OS signals that request shutdown
//! - [`stats`]: atomic connection counters
//!
//! ## Example
//!
//! ```no_run
//! use tidekv::connection::EchoHandler;
//! use tidekv::logger::Logger;
//! use tidekv::server::{Server, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = Logger::stdout()?;
//! let handler = Arc::new(EchoHandler::new(logger.clone()));
//! let server = Server::new(ServerConfig::default(), handler, logger);
//!
//! // Runs until SIGINT/SIGTERM/SIGQUIT/SIGHUP.
//! server.listen_and_serve_with_signal().await?;
//! # Ok(())
//! # }
//! ```

pub mod listener;
pub mod signals;
pub mod stats;

pub use listener::{
    classify_accept_error, AcceptErrorKind, Acceptor, Server, ServerConfig, ServerError,
    DEFAULT_ACCEPT_BACKOFF,
};
pub use signals::{ShutdownSignal, ShutdownSignals};
pub use stats::ConnectionStats;
