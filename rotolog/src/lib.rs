//! # rotolog
//!
//! A rotating log-file writer. Records append to a live file; when a size
//! threshold is exceeded or a time boundary is crossed the file is archived
//! under a fresh name, a new live file is opened, and archives past the
//! retention count are pruned. Processes sharing a log path coordinate
//! through an advisory `<file>.rotate` marker lock.
//!
//! ```no_run
//! use rotolog::{RotatingSink, RotationConfig};
//! use rotolog_sink::{FileSink, Level, Record};
//!
//! # fn main() -> Result<(), rotolog::RotationError> {
//! let config = RotationConfig::size("10mb").with_max_files(5);
//! let mut log = RotatingSink::new(FileSink::new("/var/log/app.log"), &config)?;
//! log.write(&Record::new(Level::Info, "service started"))?;
//! # Ok(())
//! # }
//! ```
//!
//! Rotation is best-effort by design: a failed attempt is logged and
//! contained, never surfaced to the logging call site, and a crash mid
//! size-renumbering can leave a gap in the archive ranks.

pub mod archive;
pub mod config;
pub mod error;
pub mod lock;
pub mod policy;
pub mod rotate;
pub mod state;
pub mod timer;

pub use config::{BuiltRotation, RotationConfig, Rule};
pub use error::RotationError;
pub use lock::{LockOptions, RotateLock};
pub use policy::{Granularity, RotationRule};
pub use rotate::RotatingSink;
pub use state::{FileStateTracker, Snapshot};
pub use timer::{spawn_rotation_timer, SharedSink};
