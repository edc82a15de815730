//! Asynchronous Log Pipeline
//!
//! Producers format a line on the calling thread and push it onto a bounded
//! queue; a single background thread pops lines in order and writes them to
//! the sinks.
//!
//! ```text
//!  task A ──┐
//!  task B ──┼──> [ sync_channel, 100 000 slots ] ──> consumer thread ──> stdout
//!  task C ──┘          (blocks when full)                    │
//!                                                            └──────> rotating file
//! ```
//!
//! ## Entry Recycling
//!
//! Every queued line lives in a [`LogEntry`] whose `String` buffer is handed
//! back to a small pool once the consumer has written it, so steady-state
//! logging reuses the same allocations.

use crate::logger::files::{LoggerConfig, LoggerError, RotatingFile};
use crate::logger::level::Level;
use chrono::Local;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::panic::Location;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};

/// Number of lines the queue holds before producers block
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Maximum number of idle entries kept for reuse
const POOL_LIMIT: usize = 1024;

/// Timestamp prefix of every written line
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// A formatted line waiting to be written.
#[derive(Debug, Default)]
pub(crate) struct LogEntry {
    message: String,
    level: Level,
}

/// Where a log call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller<'a> {
    pub file: &'a str,
    pub line: u32,
}

impl<'a> Caller<'a> {
    pub fn new(file: &'a str, line: u32) -> Self {
        Self { file, line }
    }

    /// The file's base name, without directories.
    pub fn file_name(&self) -> &'a str {
        Path::new(self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.file)
    }
}

impl<'a> From<&'a Location<'a>> for Caller<'a> {
    fn from(location: &'a Location<'a>) -> Self {
        Self::new(location.file(), location.line())
    }
}

#[derive(Debug, Default)]
struct EntryPool {
    free: Mutex<Vec<LogEntry>>,
}

impl EntryPool {
    fn get(&self) -> LogEntry {
        self.free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default()
    }

    fn put(&self, mut entry: LogEntry) {
        entry.message.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < POOL_LIMIT {
                free.push(entry);
            }
        }
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

enum Command {
    Write(LogEntry),
    /// Acknowledged once everything queued before it is written and flushed
    Flush(SyncSender<()>),
}

/// Builder for a [`Logger`] with non-default sinks.
pub struct LoggerBuilder {
    console: Box<dyn Write + Send>,
    file: Option<LoggerConfig>,
    capacity: usize,
}

impl LoggerBuilder {
    /// Replaces stdout as the console sink.
    pub fn console<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.console = Box::new(writer);
        self
    }

    /// Also writes every line to a rotating file.
    pub fn file(mut self, config: LoggerConfig) -> Self {
        self.file = Some(config);
        self
    }

    /// Sets the queue capacity (at least one slot).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Opens the sinks and starts the consumer thread.
    pub fn build(self) -> Result<Logger, LoggerError> {
        let file = match self.file {
            Some(config) => Some(RotatingFile::open(config, &Local::now())?),
            None => None,
        };

        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        let pool = Arc::new(EntryPool::default());

        let sinks = Sinks {
            console: self.console,
            file,
        };
        let consumer_pool = Arc::clone(&pool);
        std::thread::Builder::new()
            .name("tidekv-logger".to_string())
            .spawn(move || consume(receiver, sinks, consumer_pool))
            .map_err(LoggerError::Spawn)?;

        Ok(Logger {
            shared: Arc::new(Shared { sender, pool }),
        })
    }
}

struct Shared {
    sender: SyncSender<Command>,
    pool: Arc<EntryPool>,
}

/// Handle to a log pipeline.
///
/// Cloning is cheap and every clone feeds the same queue. The consumer
/// thread exits once the last clone is dropped.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder {
            console: Box::new(io::stdout()),
            file: None,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// A logger writing to stdout only.
    pub fn stdout() -> Result<Self, LoggerError> {
        Self::builder().build()
    }

    /// A logger writing to stdout and to a rotating file.
    pub fn file(config: LoggerConfig) -> Result<Self, LoggerError> {
        Self::builder().file(config).build()
    }

    /// A logger writing to `writer` instead of stdout.
    pub fn with_writer<W>(writer: W) -> Result<Self, LoggerError>
    where
        W: Write + Send + 'static,
    {
        Self::builder().console(writer).build()
    }

    /// Formats and queues one line.
    ///
    /// Blocks the calling thread while the queue is full, which on a Tokio
    /// worker stalls every task scheduled on that worker.
    pub fn output(&self, level: Level, caller: Option<Caller<'_>>, message: impl fmt::Display) {
        let mut entry = self.shared.pool.get();
        entry.level = level;

        let _ = match caller {
            Some(caller) => write!(
                entry.message,
                "[{}][{}:{}] {}",
                level,
                caller.file_name(),
                caller.line,
                message
            ),
            None => write!(entry.message, "[{}] {}", level, message),
        };

        if let Err(mpsc::SendError(Command::Write(entry))) =
            self.shared.sender.send(Command::Write(entry))
        {
            self.shared.pool.put(entry);
        }
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.output(Level::Debug, Some(Location::caller().into()), message);
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.output(Level::Info, Some(Location::caller().into()), message);
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.output(Level::Warning, Some(Location::caller().into()), message);
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.output(Level::Error, Some(Location::caller().into()), message);
    }

    /// Logs at `FATAL`. The process is not terminated.
    #[track_caller]
    pub fn fatal(&self, message: impl fmt::Display) {
        self.output(Level::Fatal, Some(Location::caller().into()), message);
    }

    /// Blocks until every line queued before this call has been written and
    /// the sinks flushed.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.shared.sender.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

struct Sinks {
    console: Box<dyn Write + Send>,
    file: Option<RotatingFile>,
}

impl Sinks {
    fn write(&mut self, line: &str) {
        let now = Local::now();

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.rotate_if_needed(&now) {
                let _ = writeln!(
                    self.console,
                    "{} [{}] log rotation failed: {}",
                    now.format(TIMESTAMP_FORMAT),
                    Level::Error,
                    e
                );
            }
        }

        let _ = self.console.write_all(line.as_bytes());
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_line(line.as_bytes());
        }
    }

    fn flush(&mut self) {
        let _ = self.console.flush();
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

fn consume(receiver: Receiver<Command>, mut sinks: Sinks, pool: Arc<EntryPool>) {
    let mut line = String::new();

    loop {
        let command = match receiver.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => {
                // Queue drained: push buffered output out before sleeping.
                sinks.flush();
                match receiver.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };

        match command {
            Command::Write(entry) => {
                line.clear();
                let _ = write!(line, "{} {}", Local::now().format(TIMESTAMP_FORMAT), entry.message);
                if !line.ends_with('\n') {
                    line.push('\n');
                }

                sinks.write(&line);
                if entry.level >= Level::Error {
                    sinks.flush();
                }

                pool.put(entry);
            }
            Command::Flush(ack) => {
                sinks.flush();
                let _ = ack.send(());
            }
        }
    }

    sinks.flush();
}
