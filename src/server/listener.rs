//! TCP Accept Loop and Shutdown Orchestration
//!
//! ## Lifecycle
//!
//! ```text
//! bind ──> accept loop ───────────────┐
//!            │   ok: spawn handle()   │  shutdown trigger:
//!            │   transient: sleep 5ms │   - cancellation token (signals, tests)
//!            │   fatal: ──────────────┤   - non-retryable accept error
//!            ▼                        ▼
//!        1. close the listener
//!        2. Handler::close()        (drains and closes connections)
//!        3. join every connection task
//!        4. return
//! ```
//!
//! The sequence runs once: [`Server::serve`] consumes the server.

use crate::connection::{ConnectionContext, Handler};
use crate::logger::Logger;
use crate::server::signals::ShutdownSignals;
use crate::server::stats::{ActiveGuard, ConnectionStats};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Delay before retrying a transient accept failure
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

// Descriptor exhaustion; identical values on Linux and the BSDs.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on
    pub address: String,
    /// Expected connection ceiling. Only logged, never enforced.
    pub max_connections: u32,
    /// Sleep between retries of a transient accept error
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("{}:{}", crate::DEFAULT_HOST, crate::DEFAULT_PORT),
            max_connections: 1024,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A non-retryable accept error; reported after shutdown completed
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

/// How the accept loop reacts to an accept error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorKind {
    /// Sleep for the backoff and keep accepting
    Transient,
    /// Leave the loop and shut down
    Fatal,
}

pub fn classify_accept_error(err: &io::Error) -> AcceptErrorKind {
    use io::ErrorKind::*;

    match err.kind() {
        TimedOut | WouldBlock | Interrupted | ConnectionAborted | ConnectionReset => {
            AcceptErrorKind::Transient
        }
        _ if matches!(err.raw_os_error(), Some(ENFILE | EMFILE)) => AcceptErrorKind::Transient,
        _ => AcceptErrorKind::Fatal,
    }
}

/// Source of incoming connections.
///
/// Dropping the acceptor closes it.
pub trait Acceptor: Send {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accepts connections and hands them to a [`Handler`].
pub struct Server<H> {
    config: ServerConfig,
    handler: Arc<H>,
    logger: Logger,
    stats: Arc<ConnectionStats>,
}

impl<H: Handler> Server<H> {
    pub fn new(config: ServerConfig, handler: Arc<H>, logger: Logger) -> Self {
        Self {
            config,
            handler,
            logger,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.address)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.config.address.clone(),
                source,
            })
    }

    /// Binds, then serves until a shutdown signal or a fatal accept error.
    pub async fn listen_and_serve_with_signal(self) -> Result<(), ServerError> {
        let signals = ShutdownSignals::install().map_err(ServerError::Signal)?;
        let listener = self.bind().await?;
        self.serve_with_signals(listener, signals).await
    }

    /// Like [`Server::listen_and_serve_with_signal`], on an already bound
    /// listener.
    pub async fn listen_and_serve_with_signal_on(
        self,
        listener: TcpListener,
    ) -> Result<(), ServerError> {
        let signals = ShutdownSignals::install().map_err(ServerError::Signal)?;
        self.serve_with_signals(listener, signals).await
    }

    async fn serve_with_signals(
        self,
        listener: TcpListener,
        mut signals: ShutdownSignals,
    ) -> Result<(), ServerError> {
        match listener.local_addr() {
            Ok(addr) => self.logger.info(format_args!("tcp server start at {}", addr)),
            Err(_) => self
                .logger
                .info(format_args!("tcp server start at {}", self.config.address)),
        }

        let shutdown = CancellationToken::new();
        let signal_task = {
            let shutdown = shutdown.clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                let signal = signals.recv().await;
                logger.info(format_args!("get exit signal {}", signal.name()));
                shutdown.cancel();
            })
        };

        let result = self.serve(listener, shutdown).await;
        signal_task.abort();
        result
    }

    /// Runs the accept loop, then the shutdown sequence.
    ///
    /// Returns once every connection task has finished. A fatal accept error
    /// is returned as [`ServerError::Accept`] after the sequence completed.
    pub async fn serve<A: Acceptor>(
        self,
        mut acceptor: A,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        self.logger.debug(format_args!(
            "accepting connections (max connections hint: {})",
            self.config.max_connections
        ));

        let mut tasks = JoinSet::new();

        let fatal = loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break None,
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.spawn_connection(&mut tasks, stream, peer_addr),
                Err(e) if classify_accept_error(&e) == AcceptErrorKind::Transient => {
                    self.stats.accept_retried();
                    self.logger.info(format_args!(
                        "accept occurs temporary error: {}, retry in {:?}",
                        e, self.config.accept_backoff
                    ));
                    tokio::time::sleep(self.config.accept_backoff).await;
                }
                Err(e) => break Some(e),
            }

            while let Some(result) = tasks.try_join_next() {
                self.report_task(result);
            }
        };

        drop(acceptor);
        match &fatal {
            Some(e) => self.logger.error(format_args!("accept error: {}", e)),
            None => self.logger.info("shutdown requested"),
        }
        self.logger.info("shutting down");

        if let Err(e) = self.handler.close().await {
            self.logger.error(format_args!("handler close failed: {}", e));
        }

        while let Some(result) = tasks.join_next().await {
            self.report_task(result);
        }

        self.logger.info(format_args!(
            "server stopped after {} connections",
            self.stats.accepted()
        ));

        match fatal {
            Some(e) => Err(ServerError::Accept(e)),
            None => Ok(()),
        }
    }

    fn spawn_connection(&self, tasks: &mut JoinSet<()>, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.stats.connection_opened();
        self.logger.info(format_args!("accept link {} from {}", id, peer_addr));

        if self.stats.active() == u64::from(self.config.max_connections) + 1 {
            self.logger.warn(format_args!(
                "active connections exceed the configured hint of {}",
                self.config.max_connections
            ));
        }

        let ctx = ConnectionContext { id, peer_addr };
        let handler = Arc::clone(&self.handler);
        let guard = ActiveGuard(Arc::clone(&self.stats));
        tasks.spawn(async move {
            let _guard = guard;
            handler.handle(ctx, stream).await;
        });
    }

    fn report_task(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                self.logger.error(format_args!("connection task panicked: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{EchoHandler, HandlerError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn quiet_logger() -> Logger {
        Logger::with_writer(std::io::sink()).unwrap()
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    async fn echo(client: &mut TcpStream, message: &[u8]) -> Vec<u8> {
        client.write_all(message).await.unwrap();
        let mut buf = vec![0u8; message.len()];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn assert_closed_by_server(client: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("server did not close the connection");
        match read {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }
    }

    /// Replays scripted accept errors, then delegates to a real listener.
    struct ScriptedAcceptor {
        inner: TcpListener,
        script: VecDeque<Option<io::Error>>,
    }

    impl Acceptor for ScriptedAcceptor {
        async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
            match self.script.pop_front() {
                Some(Some(err)) => Err(err),
                _ => self.inner.accept().await,
            }
        }
    }

    #[test]
    fn test_classify_accept_error() {
        let transient = [
            io::ErrorKind::TimedOut,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Interrupted,
            io::ErrorKind::ConnectionAborted,
        ];
        for kind in transient {
            assert_eq!(
                classify_accept_error(&io::Error::from(kind)),
                AcceptErrorKind::Transient
            );
        }

        assert_eq!(
            classify_accept_error(&io::Error::from_raw_os_error(EMFILE)),
            AcceptErrorKind::Transient
        );
        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::PermissionDenied)),
            AcceptErrorKind::Fatal
        );
        assert_eq!(
            classify_accept_error(&io::Error::new(io::ErrorKind::Other, "listener gone")),
            AcceptErrorKind::Fatal
        );
    }

    #[tokio::test]
    async fn test_bind_error() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            address: occupied.local_addr().unwrap().to_string(),
            ..Default::default()
        };
        let handler = Arc::new(EchoHandler::new(quiet_logger()));
        let server = Server::new(config, handler, quiet_logger());

        assert!(matches!(server.bind().await, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_scenario() {
        let handler = Arc::new(EchoHandler::new(quiet_logger()));
        let server = Server::new(test_config(), Arc::clone(&handler), quiet_logger());
        let stats = server.stats();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(listener, shutdown.clone()));

        let mut clients = Vec::new();
        for i in 0..3 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let message = format!("hello {}\n", i);
            assert_eq!(echo(&mut client, message.as_bytes()).await, message.as_bytes());
            clients.push(client);
        }
        assert_eq!(handler.active_connections(), 3);
        assert_eq!(stats.active(), 3);

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), serving)
            .await
            .expect("shutdown exceeded the grace period")
            .unwrap();
        assert!(result.is_ok());

        for client in &mut clients {
            assert_closed_by_server(client).await;
        }
        assert_eq!(handler.active_connections(), 0);
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.accepted(), 3);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_signal_shuts_down() {
        let _serial = crate::server::signals::serialize_signal_tests();

        let handler = Arc::new(EchoHandler::new(quiet_logger()));
        let server = Server::new(test_config(), Arc::clone(&handler), quiet_logger());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.listen_and_serve_with_signal_on(listener));

        // Handlers are installed before the first connection is accepted.
        let mut clients = Vec::new();
        for i in 0..3 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let message = format!("before signal {}\n", i);
            assert_eq!(echo(&mut client, message.as_bytes()).await, message.as_bytes());
            clients.push(client);
        }

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(10), serving)
            .await
            .expect("interrupt did not stop the server")
            .unwrap();
        assert!(result.is_ok());

        for client in &mut clients {
            assert_closed_by_server(client).await;
        }
        assert_eq!(handler.active_connections(), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_transient_accept_errors_are_retried() {
        let handler = Arc::new(EchoHandler::new(quiet_logger()));
        let server = Server::new(test_config(), Arc::clone(&handler), quiet_logger());
        let stats = server.stats();
        let inner = server.bind().await.unwrap();
        let addr = inner.local_addr().unwrap();
        let acceptor = ScriptedAcceptor {
            inner,
            script: VecDeque::from([
                Some(io::Error::from(io::ErrorKind::TimedOut)),
                Some(io::Error::from(io::ErrorKind::ConnectionAborted)),
            ]),
        };

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(acceptor, shutdown.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut client, b"still here\n").await, b"still here\n");
        assert_eq!(stats.accept_retries(), 2);

        shutdown.cancel();
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fatal_accept_error_triggers_shutdown() {
        let handler = Arc::new(EchoHandler::new(quiet_logger()));
        let server = Server::new(test_config(), Arc::clone(&handler), quiet_logger());
        let inner = server.bind().await.unwrap();
        let addr = inner.local_addr().unwrap();
        let acceptor = ScriptedAcceptor {
            inner,
            script: VecDeque::from([
                None,
                Some(io::Error::new(io::ErrorKind::Other, "listener gone")),
            ]),
        };

        let serving = tokio::spawn(server.serve(acceptor, CancellationToken::new()));
        let mut client = TcpStream::connect(addr).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ServerError::Accept(_))));
        assert!(handler.is_closing());
        assert_eq!(handler.active_connections(), 0);
        assert_closed_by_server(&mut client).await;
    }

    /// Records the order of lifecycle events.
    struct RecordingHandler {
        addr: Mutex<Option<SocketAddr>>,
        listener_closed_before_close: AtomicBool,
        close_calls: AtomicUsize,
        finished: AtomicUsize,
        fail_close: bool,
    }

    impl RecordingHandler {
        fn new(fail_close: bool) -> Self {
            Self {
                addr: Mutex::new(None),
                listener_closed_before_close: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                fail_close,
            }
        }
    }

    impl Handler for RecordingHandler {
        async fn handle(&self, _ctx: ConnectionContext, stream: TcpStream) {
            // Outlive close() so the server has to join us.
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(stream);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        async fn close(&self) -> Result<(), HandlerError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            let addr = *self.addr.lock().unwrap();
            if let Some(addr) = addr {
                let refused = TcpStream::connect(addr).await.is_err();
                self.listener_closed_before_close
                    .store(refused, Ordering::SeqCst);
            }
            if self.fail_close {
                return Err(HandlerError::Io(io::Error::new(io::ErrorKind::Other, "boom")));
            }
            Ok(())
        }
    }

    async fn run_recording(fail_close: bool) -> Arc<RecordingHandler> {
        let handler = Arc::new(RecordingHandler::new(fail_close));
        let server = Server::new(test_config(), Arc::clone(&handler), quiet_logger());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        *handler.addr.lock().unwrap() = Some(addr);

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(listener, shutdown.clone()));

        let _clients = vec![
            TcpStream::connect(addr).await.unwrap(),
            TcpStream::connect(addr).await.unwrap(),
        ];
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        serving.await.unwrap().unwrap();
        handler
    }

    #[tokio::test]
    async fn test_shutdown_order_and_join() {
        let handler = run_recording(false).await;

        assert_eq!(handler.close_calls.load(Ordering::SeqCst), 1);
        assert!(handler.listener_closed_before_close.load(Ordering::SeqCst));
        assert_eq!(handler.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_close_error_still_joins_tasks() {
        let handler = run_recording(true).await;

        assert_eq!(handler.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.finished.load(Ordering::SeqCst), 2);
    }
}
