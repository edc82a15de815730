//! Rotating Log Files
//!
//! The file sink is named from a template: `{name}-{timestamp}.{ext}` inside
//! the configured directory, where the timestamp is rendered with a
//! `strftime` pattern. The granularity of the pattern decides how often the
//! file rotates: `%Y-%m-%d` gives one file per day, `%Y-%m-%d-%H` one per hour.
//!
//! The expected name is recomputed for every line written. When it no longer
//! matches the open file, the old handle is flushed and closed before the
//! new one takes over.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while setting up or rotating the log pipeline.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The rotation pattern contains an unknown `strftime` specifier
    #[error("invalid time format: {0:?}")]
    InvalidTimeFormat(String),

    #[error("failed to create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The background consumer thread could not be started
    #[error("failed to spawn logger thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Where and how log files are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Directory holding the log files (created if missing)
    pub path: PathBuf,
    /// Base file name
    pub name: String,
    /// File extension, without the dot
    pub ext: String,
    /// `strftime` pattern controlling rotation granularity
    pub time_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs"),
            name: "tidekv".to_string(),
            ext: "log".to_string(),
            time_format: "%Y-%m-%d".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Rejects rotation patterns chrono cannot render.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if StrftimeItems::new(&self.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(LoggerError::InvalidTimeFormat(self.time_format.clone()));
        }
        Ok(())
    }

    /// The file name a line written at `now` belongs in.
    pub fn file_name_at(&self, now: &DateTime<Local>) -> Result<String, LoggerError> {
        let mut name = String::new();
        write!(
            name,
            "{}-{}.{}",
            self.name,
            now.format(&self.time_format),
            self.ext
        )
        .map_err(|_| LoggerError::InvalidTimeFormat(self.time_format.clone()))?;
        Ok(name)
    }
}

/// A log file that switches to a new name when the time bucket changes.
#[derive(Debug)]
pub struct RotatingFile {
    config: LoggerConfig,
    current: PathBuf,
    file: BufWriter<File>,
}

impl RotatingFile {
    /// Opens the file for the bucket containing `now`.
    pub fn open(config: LoggerConfig, now: &DateTime<Local>) -> Result<Self, LoggerError> {
        config.validate()?;

        let current = config.path.join(config.file_name_at(now)?);
        let file = open_log_file(&config.path, &current)?;

        Ok(Self {
            config,
            current,
            file: BufWriter::new(file),
        })
    }

    /// Path of the file currently being written.
    pub fn path(&self) -> &Path {
        &self.current
    }

    /// Switches files if `now` falls in a different bucket.
    ///
    /// Returns `Ok(true)` when a new file was opened. On error the current
    /// file stays active.
    pub fn rotate_if_needed(&mut self, now: &DateTime<Local>) -> Result<bool, LoggerError> {
        let expected = self.config.path.join(self.config.file_name_at(now)?);
        if expected == self.current {
            return Ok(false);
        }

        let next = open_log_file(&self.config.path, &expected)?;

        // Release the previous handle before installing the new one.
        let _ = self.file.flush();
        let previous = std::mem::replace(&mut self.file, BufWriter::new(next));
        drop(previous);

        self.current = expected;
        Ok(true)
    }

    pub fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_log_file(dir: &Path, path: &Path) -> Result<File, LoggerError> {
    fs::create_dir_all(dir).map_err(|source| LoggerError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggerError::Open {
            path: path.to_path_buf(),
            source,
        })
}
