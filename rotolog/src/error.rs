use std::path::PathBuf;

use thiserror::Error;

/// Error surface for rotation policy, locking, and the rotate protocol.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rotate lock {path} still held after {attempts} attempts")]
    LockBusy { path: PathBuf, attempts: u32 },

    #[error("rename {from} -> {to} failed: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink error: {0}")]
    Sink(#[from] rotolog_sink::SinkError),

    #[error("invalid rotation config: {0}")]
    Config(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RotationError {
    RotationError::Io {
        path: path.into(),
        source,
    }
}
