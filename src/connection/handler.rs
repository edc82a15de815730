//! Connection Handler Contract
//!
//! The server knows nothing about the bytes flowing over a connection. It
//! hands each accepted stream to a [`Handler`] and, when shutting down, asks
//! the same handler to close everything it still holds.
//!
//! ## Contract
//!
//! - [`Handler::handle`] runs for the whole life of one connection. It is
//!   called concurrently for distinct connections and must return once the
//!   peer goes away, an unrecoverable error occurs, or the handler closes the
//!   connection itself.
//! - [`Handler::close`] is called exactly once, after the listener has been
//!   closed. It must stop admitting new connections immediately, give every
//!   active connection a bounded grace period to finish in-flight work, then
//!   close it. Connections that already went away must be tolerated.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;

/// Identifier assigned by the server to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection information passed alongside the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// Why a connection's read loop ended.
///
/// All of these are local to one connection; none of them reach the accept
/// loop.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed the connection between messages
    #[error("peer closed the connection")]
    PeerClosed,

    /// The peer closed the connection in the middle of a message
    #[error("connection closed with {len} bytes of an unterminated message")]
    UnterminatedMessage { len: usize },

    /// A message grew past the buffer limit without a delimiter
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure reported by [`Handler::close`].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("I/O error while closing connections: {0}")]
    Io(#[from] io::Error),
}

/// A protocol plugged into the server.
pub trait Handler: Send + Sync + 'static {
    /// Serves one connection until it ends.
    fn handle(&self, ctx: ConnectionContext, stream: TcpStream) -> impl Future<Output = ()> + Send;

    /// Stops accepting work and closes every active connection.
    fn close(&self) -> impl Future<Output = Result<(), HandlerError>> + Send;
}
