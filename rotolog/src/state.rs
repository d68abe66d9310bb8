//! On-disk file-state tracking: throttled stat cycles, identity checks, and
//! the rotation-due decision.
//!
//! The tracker never touches the rotate protocol itself; it only answers
//! "what does the live file look like" and "is rotation due", recovering
//! from externally deleted or replaced files by asking the sink to reopen.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use rotolog_sink::Sink;

use crate::policy::{Granularity, RotationRule};

/// Minimum spacing between two stat cycles on the emit path. Bounds stat
/// syscall frequency under high write rates.
pub const CHECK_THROTTLE: Duration = Duration::from_millis(50);

/// Identity marker for the live file, used to detect external replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileId {
    fn of(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                dev: meta.dev(),
                ino: meta.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                created: meta.created().ok(),
            }
        }
    }
}

/// What one stat cycle observed.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub size: u64,
    pub identity: FileId,
}

/// Mutable rotation bookkeeping for one handler.
#[derive(Debug)]
pub struct RotationState {
    pub next_check_deadline: Instant,
    pub rotate_at: Option<DateTime<Local>>,
    pub period_start: Option<DateTime<Local>>,
    pub last_observed_size: u64,
    pub last_check: DateTime<Local>,
    pub rotation_in_progress: bool,
    pub identity: Option<FileId>,
}

/// Periodic, throttled inspection of the live file.
#[derive(Debug)]
pub struct FileStateTracker {
    state: RotationState,
}

impl FileStateTracker {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            state: RotationState {
                next_check_deadline: Instant::now(),
                rotate_at: None,
                period_start: None,
                last_observed_size: 0,
                last_check: now,
                rotation_in_progress: false,
                identity: None,
            },
        }
    }

    pub fn rotate_at(&self) -> Option<DateTime<Local>> {
        self.state.rotate_at
    }

    pub fn period_start(&self) -> Option<DateTime<Local>> {
        self.state.period_start
    }

    pub fn rotation_in_progress(&self) -> bool {
        self.state.rotation_in_progress
    }

    pub fn set_rotation_in_progress(&mut self, value: bool) {
        self.state.rotation_in_progress = value;
    }

    /// Recompute `rotate_at` / `period_start` for a time rule. Called at
    /// construction, after every completed or skipped rotation, and on
    /// lock-failure fallback. `rotate_at` is kept strictly increasing even
    /// when rescheduling runs before the current boundary has passed.
    pub fn schedule(&mut self, granularity: &Granularity, now: DateTime<Local>) {
        let mut boundary = granularity.next_boundary(now);
        if let Some(previous) = self.state.rotate_at {
            if boundary <= previous {
                boundary = granularity.next_boundary(previous);
            }
        }
        self.state.period_start = Some(granularity.period_start(boundary));
        self.state.rotate_at = Some(boundary);
    }

    /// Throttle gate for the emit path: true at most once per
    /// [`CHECK_THROTTLE`]. Never blocks.
    pub fn check_due(&mut self, now: Instant) -> bool {
        if now < self.state.next_check_deadline {
            return false;
        }
        self.state.next_check_deadline = now + CHECK_THROTTLE;
        true
    }

    /// Stat the live file, recovering from external deletion or replacement
    /// by reopening the sink. Returns `None` when this cycle produced no
    /// usable data; the rotation decision is withheld, never escalated.
    pub fn snapshot(&mut self, sink: &mut dyn Sink) -> Option<Snapshot> {
        let mut snapshot = match self.stat_with_reopen(sink) {
            Some(snapshot) => snapshot,
            None => return None,
        };

        let replaced = match self.state.identity {
            Some(known) if known != snapshot.identity => true,
            // A file that shrank under us was truncated or swapped out.
            _ => snapshot.size < self.state.last_observed_size,
        };

        if replaced {
            tracing::info!(
                path = %sink.path().display(),
                "live file replaced or truncated externally; reopening",
            );
            if let Err(err) = sink.reopen() {
                tracing::warn!(path = %sink.path().display(), error = %err, "reopen failed");
                return None;
            }
            self.reset_stream();
            snapshot = self.stat_with_reopen(sink)?;
        }

        self.state.identity = Some(snapshot.identity);
        self.state.last_observed_size = snapshot.size;
        Some(snapshot)
    }

    fn stat_with_reopen(&mut self, sink: &mut dyn Sink) -> Option<Snapshot> {
        match stat(sink.path()) {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                // Vanished out from under us; reopen and retry the stat once.
                if let Err(err) = sink.reopen() {
                    tracing::warn!(path = %sink.path().display(), error = %err, "reopen failed");
                    return None;
                }
                self.reset_stream();
                match stat(sink.path()) {
                    Ok(found) => found,
                    Err(err) => {
                        tracing::warn!(path = %sink.path().display(), error = %err, "stat failed");
                        None
                    }
                }
            }
            Err(err) => {
                tracing::warn!(path = %sink.path().display(), error = %err, "stat failed");
                None
            }
        }
    }

    /// Is rotation due, given a fresh snapshot? Consumes and advances
    /// `last_check` so a tracker that slept through an entire period still
    /// rotates it out on the next check.
    pub fn should_rotate(
        &mut self,
        rule: &RotationRule,
        snapshot: &Snapshot,
        now: DateTime<Local>,
        force: bool,
    ) -> bool {
        let previous_check = self.state.last_check;
        self.state.last_check = now;
        match rule {
            RotationRule::Size { max_bytes } => snapshot.size > *max_bytes,
            RotationRule::Time { .. } => {
                if force {
                    return true;
                }
                let due_now = self.state.rotate_at.is_some_and(|at| now >= at);
                let slept_past = self
                    .state
                    .period_start
                    .is_some_and(|start| previous_check < start);
                due_now || slept_past
            }
        }
    }

    /// Reset identity/size tracking; called whenever the stream is reopened.
    pub fn reset_stream(&mut self) {
        self.state.identity = None;
        self.state.last_observed_size = 0;
    }
}

fn stat(path: &Path) -> std::io::Result<Option<Snapshot>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(Snapshot {
            size: meta.len(),
            identity: FileId::of(&meta),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
