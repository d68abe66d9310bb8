//! The sink capability interface and its plain file-backed implementation.
//!
//! Rotation composes over this trait instead of inheriting from a concrete
//! stream type: anything that can `open`/`write`/`reopen`/`close` and format
//! records can be wrapped by the rotation machinery.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SinkError};
use crate::record::{Formatter, LineFormatter, Record};

/// Capability interface for a writable log destination.
pub trait Sink: Send {
    /// Path of the live file this sink appends to.
    fn path(&self) -> &Path;

    /// Open (or create) the underlying stream in append mode.
    fn open(&mut self) -> Result<(), SinkError>;

    /// Append one formatted line to the current stream.
    fn write(&mut self, text: &str) -> Result<(), SinkError>;

    /// Close and immediately re-open the stream at the same path.
    fn reopen(&mut self) -> Result<(), SinkError>;

    /// Flush and close the stream. Idempotent.
    fn close(&mut self) -> Result<(), SinkError>;

    /// Turn a record into the line that `write` will receive.
    fn format(&self, record: &Record) -> String;
}

/// Append-only file sink with a pluggable formatter.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    formatter: Box<dyn Formatter>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            formatter: Box::new(LineFormatter),
        }
    }

    pub fn with_formatter(path: impl Into<PathBuf>, formatter: Box<dyn Formatter>) -> Self {
        Self {
            path: path.into(),
            file: None,
            formatter,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Sink for FileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<(), SinkError> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, text: &str) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or_else(|| SinkError::NotOpen {
            path: self.path.clone(),
        })?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| io_err(&self.path, e))
    }

    fn reopen(&mut self) -> Result<(), SinkError> {
        self.close()?;
        self.open()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| io_err(&self.path, e))?;
        }
        Ok(())
    }

    fn format(&self, record: &Record) -> String {
        self.formatter.format(record)
    }
}
