use std::path::PathBuf;

use thiserror::Error;

/// Error surface for sinks, filename patterns, and retention pruning.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink is not open: {path}")]
    NotOpen { path: PathBuf },

    #[error("invalid filename pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.into(),
        source,
    }
}
