//! # rotolog-sink
//!
//! Plain log sinks and their collaborators, kept deliberately free of any
//! rotation logic:
//! - [`record`] — [`Record`] plus line/JSON formatters
//! - [`file`] — the [`Sink`] capability trait and [`FileSink`]
//! - [`pattern`] — compiled archive-name patterns ([`FilePattern`])
//! - [`prune`] — retention pruning by embedded timestamp ([`Pruner`])
//!
//! The `rotolog` crate composes these into a self-rotating writer.

pub mod error;
pub mod file;
pub mod pattern;
pub mod prune;
pub mod record;

pub use error::SinkError;
pub use file::{FileSink, Sink};
pub use pattern::FilePattern;
pub use prune::Pruner;
pub use record::{Formatter, JsonFormatter, Level, LineFormatter, Record};
