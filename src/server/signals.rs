//! OS signal handling.
//!
//! Hangup, quit, terminate and interrupt all mean the same thing here: stop
//! the server gracefully. Handlers are installed up front so that a signal
//! arriving while the listener is still binding is not lost.

use std::io;

/// A signal that requests shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Hangup,
    Quit,
    Terminate,
    Interrupt,
}

impl ShutdownSignal {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
        }
    }
}

/// Installed handlers for every shutdown signal.
#[cfg(unix)]
#[derive(Debug)]
pub struct ShutdownSignals {
    hangup: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Registers the handlers. Must be called inside a Tokio runtime.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Waits for the next shutdown signal.
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.hangup.recv() => ShutdownSignal::Hangup,
            _ = self.quit.recv() => ShutdownSignal::Quit,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
        }
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
pub struct ShutdownSignals {
    _private: (),
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> ShutdownSignal {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    }
}

/// Signals are process-wide, so tests that raise them must not overlap.
#[cfg(all(test, unix))]
pub(crate) fn serialize_signal_tests() -> std::sync::MutexGuard<'static, ()> {
    static SIGNAL_TESTS: std::sync::Mutex<()> = std::sync::Mutex::new(());
    SIGNAL_TESTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
