//! Echo Handler
//!
//! The reference [`Handler`]: every newline-terminated message a client sends
//! is written back unchanged. It exists to exercise the server's accept loop
//! and shutdown sequence end to end.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. handle() called
//!        │
//!        ├── closing? ──> drop the stream, never registered
//!        ▼
//! 2. EchoClient registered under its ConnectionId
//!        │
//!        ▼
//! 3. ┌───────────────────────────────────┐
//!    │ read until '\n'                   │
//!    │ waiting.add(1)                    │
//!    │ write the same bytes back         │
//!    │ waiting.done()                    │
//!    └───────────────────────────────────┘
//!        │
//!        ▼
//! 4. peer closed / error / force-closed ──> deregistered
//! ```
//!
//! ## Shutdown
//!
//! `close()` raises the closing flag, then for every registered client waits
//! up to the grace period for its in-flight echo to finish and closes the
//! connection whatever the outcome. Clients are drained concurrently.

use crate::connection::handler::{
    ConnectionContext, ConnectionError, ConnectionId, Handler, HandlerError,
};
use crate::logger::Logger;
use crate::sync::{AtomicFlag, DrainWait};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How long `close()` waits for a client's in-flight work
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// One registered connection.
#[derive(Debug)]
pub struct EchoClient {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    waiting: DrainWait,
    /// Cancelled when the connection is force-closed
    closed: CancellationToken,
}

impl EchoClient {
    fn new(ctx: ConnectionContext, writer: OwnedWriteHalf) -> Self {
        Self {
            id: ctx.id,
            peer_addr: ctx.peer_addr,
            writer: Mutex::new(writer),
            waiting: DrainWait::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// In-flight operations on this connection.
    pub fn waiting(&self) -> &DrainWait {
        &self.waiting
    }

    /// Waits up to `grace` for in-flight work, then closes the connection.
    ///
    /// Returns `true` if the grace period ran out.
    pub async fn close(&self, grace: Duration) -> bool {
        let timed_out = self.waiting.wait_with_timeout(grace).await;
        self.force_close().await;
        timed_out
    }

    async fn force_close(&self) {
        // Cancelling first makes any pending write give up the writer lock.
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        // The peer may already be gone.
        let _ = writer.shutdown().await;
    }

    async fn write(&self, message: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(message).await?;
        writer.flush().await
    }
}

/// Echoes newline-delimited messages back to the sender.
#[derive(Debug)]
pub struct EchoHandler {
    connections: DashMap<ConnectionId, Arc<EchoClient>>,
    closing: AtomicFlag,
    grace_period: Duration,
    max_message_size: usize,
    logger: Logger,
}

impl EchoHandler {
    pub fn new(logger: Logger) -> Self {
        Self {
            connections: DashMap::new(),
            closing: AtomicFlag::new(false),
            grace_period: DEFAULT_GRACE_PERIOD,
            max_message_size: usize::MAX,
            logger,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Caps the bytes buffered while waiting for a delimiter. Unlimited by
    /// default; a client exceeding the cap is disconnected without a reply.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size.max(1);
        self
    }

    /// Number of registered connections.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn client(&self, id: ConnectionId) -> Option<Arc<EchoClient>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    /// The read-echo loop. `Ok(())` means the connection was force-closed.
    async fn serve(
        &self,
        client: &EchoClient,
        mut reader: OwnedReadHalf,
    ) -> Result<(), ConnectionError> {
        let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);

        loop {
            while let Some(message) = next_message(&mut buffer) {
                client.waiting.add(1);
                let written = tokio::select! {
                    biased;
                    _ = client.closed.cancelled() => None,
                    result = client.write(&message) => Some(result),
                };
                client.waiting.done();

                match written {
                    Some(result) => result?,
                    None => return Ok(()),
                }
            }

            if buffer.len() >= self.max_message_size {
                return Err(ConnectionError::MessageTooLarge {
                    size: buffer.len(),
                    max: self.max_message_size,
                });
            }

            let n = tokio::select! {
                biased;
                _ = client.closed.cancelled() => return Ok(()),
                result = reader.read_buf(&mut buffer) => result?,
            };

            if n == 0 {
                return if buffer.is_empty() {
                    Err(ConnectionError::PeerClosed)
                } else {
                    Err(ConnectionError::UnterminatedMessage { len: buffer.len() })
                };
            }
        }
    }
}

impl Handler for EchoHandler {
    async fn handle(&self, ctx: ConnectionContext, stream: TcpStream) {
        if self.closing.get() {
            self.logger.debug(format_args!(
                "rejecting connection {} from {} during shutdown",
                ctx.id, ctx.peer_addr
            ));
            drop(stream);
            return;
        }

        let (reader, writer) = stream.into_split();
        let client = Arc::new(EchoClient::new(ctx, writer));
        self.connections.insert(ctx.id, Arc::clone(&client));

        // close() may have taken its snapshot between the check above and
        // the insert; in that case nobody else will close this client.
        if self.closing.get() {
            self.connections.remove(&ctx.id);
            client.force_close().await;
            return;
        }

        match self.serve(&client, reader).await {
            Ok(()) => self
                .logger
                .debug(format_args!("connection {} closed by shutdown", ctx.id)),
            Err(ConnectionError::PeerClosed) => self.logger.info("connection close"),
            Err(e) => self.logger.warn(format_args!(
                "connection {} from {}: {}",
                ctx.id, ctx.peer_addr, e
            )),
        }

        self.connections.remove(&ctx.id);
    }

    async fn close(&self) -> Result<(), HandlerError> {
        self.logger.info("handler shutting down");
        self.closing.set(true);

        let clients: Vec<Arc<EchoClient>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        join_all(clients.iter().map(move |client| async move {
            if client.close(self.grace_period).await {
                self.logger.warn(format_args!(
                    "connection {} still busy after {:?}, closing anyway",
                    client.id, self.grace_period
                ));
            }
            self.connections.remove(&client.id);
        }))
        .await;

        Ok(())
    }
}

/// Splits the first complete message, delimiter included, off the buffer.
fn next_message(buffer: &mut BytesMut) -> Option<Bytes> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    Some(buffer.split_to(end + 1).freeze())
}
