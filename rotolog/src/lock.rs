//! Advisory cross-process rotate lock.
//!
//! The lock is a marker file at `<file>.rotate`, created with `O_EXCL`.
//! Cooperating processes that honor the protocol get mutual exclusion; a
//! process that bypasses it can violate the lock (advisory by design). A
//! marker older than the staleness timeout is treated as left behind by a
//! crashed holder and reclaimed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;

use crate::error::{io_err, RotationError};

/// Retry/staleness tuning for one lock acquisition.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Age after which a held marker is considered abandoned.
    pub stale_after: Duration,
    /// Total creation attempts before giving up.
    pub max_attempts: u32,
    /// Randomized sleep between attempts is drawn from this range.
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30),
            max_attempts: 5,
            backoff_min: Duration::from_millis(10),
            backoff_max: Duration::from_millis(60),
        }
    }
}

/// Held lock; the marker file is removed on drop, on every exit path.
#[derive(Debug)]
pub struct RotateLock {
    path: PathBuf,
}

/// `<file>.rotate` next to the live file.
pub fn lock_path_for(live: &Path) -> PathBuf {
    let name = live
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("log");
    live.with_file_name(format!("{name}.rotate"))
}

impl RotateLock {
    /// Acquire the advisory lock for `live`, retrying with randomized
    /// backoff and reclaiming stale markers.
    ///
    /// # Errors
    /// [`RotationError::LockBusy`] once the retry budget is exhausted;
    /// [`RotationError::Io`] on unexpected filesystem failures.
    pub fn acquire(live: &Path, opts: &LockOptions) -> Result<Self, RotationError> {
        let path = lock_path_for(live);
        let mut attempts = 0;

        while attempts < opts.max_attempts {
            attempts += 1;
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut marker) => {
                    // Contents are diagnostics only; the file's existence is
                    // the lock.
                    let note = format!("pid={} at={}\n", std::process::id(), chrono::Local::now());
                    if let Err(err) = marker.write_all(note.as_bytes()) {
                        tracing::debug!(path = %path.display(), error = %err, "lock note write failed");
                    }
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::reclaim_if_stale(&path, opts.stale_after)? {
                        // Retry immediately; the marker we just removed may
                        // still race with another reclaimer.
                        continue;
                    }
                    // No sleep once the budget is spent.
                    if attempts < opts.max_attempts {
                        let backoff = random_backoff(opts);
                        tracing::debug!(
                            path = %path.display(),
                            attempt = attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "rotate lock held; backing off",
                        );
                        std::thread::sleep(backoff);
                    }
                }
                Err(err) => return Err(io_err(&path, err)),
            }
        }

        Err(RotationError::LockBusy {
            path,
            attempts: opts.max_attempts,
        })
    }

    /// Remove a marker whose mtime is older than `stale_after`. Returns true
    /// if a stale marker was reclaimed.
    fn reclaim_if_stale(path: &Path, stale_after: Duration) -> Result<bool, RotationError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            // Holder released between our create attempt and this stat.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(io_err(path, err)),
        };

        let age = meta
            .modified()
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .unwrap_or(Duration::ZERO);
        if age <= stale_after {
            return Ok(false);
        }

        tracing::warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "reclaiming stale rotate lock",
        );
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(io_err(path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RotateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "lock release failed");
            }
        }
    }
}

fn random_backoff(opts: &LockOptions) -> Duration {
    let min = opts.backoff_min.as_millis() as u64;
    let max = (opts.backoff_max.as_millis() as u64).max(1);
    if min >= max {
        return opts.backoff_min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}
