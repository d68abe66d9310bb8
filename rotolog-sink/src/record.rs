//! Log records and the formatters that turn them into text.
//!
//! Formatting is deliberately decoupled from rotation: a [`Record`] is turned
//! into one line of text by a [`Formatter`], and the rotation machinery only
//! ever sees the resulting line.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Debug => write!(f, "debug"),
            Level::Info => write!(f, "info"),
            Level::Warn => write!(f, "warn"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl Record {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

/// Turns a record into a single line of output (no trailing newline).
pub trait Formatter: Send {
    fn format(&self, record: &Record) -> String;
}

/// `<rfc3339> [<level>] <message>`
#[derive(Debug, Default, Clone)]
pub struct LineFormatter;

impl Formatter for LineFormatter {
    fn format(&self, record: &Record) -> String {
        format!(
            "{} [{}] {}",
            record.timestamp.to_rfc3339(),
            record.level,
            record.message
        )
    }
}

/// One JSON object per line.
#[derive(Debug, Default, Clone)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, record: &Record) -> String {
        // Serialization of Record cannot fail: all fields are plain data.
        serde_json::to_string(record).unwrap_or_else(|_| record.message.clone())
    }
}
