//! Connection counters shared between the accept loop and connection tasks.

use crate::connection::ConnectionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    connections_accepted: AtomicU64,
    /// Currently active connections
    active_connections: AtomicU64,
    /// Accept failures that were retried
    accept_retries: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new connection and returns its id.
    ///
    /// Ids start at 1 and are never reused.
    pub fn connection_opened(&self) -> ConnectionId {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        let previous = self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        ConnectionId::new(previous + 1)
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn accept_retried(&self) {
        self.accept_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn accept_retries(&self) -> u64 {
        self.accept_retries.load(Ordering::Relaxed)
    }
}

/// Marks a connection closed when the owning task ends, however it ends.
pub(crate) struct ActiveGuard(pub(crate) Arc<ConnectionStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}
