//! Retention pruning for time-based archives.
//!
//! The pruner owns no rotation logic: it lists files matching a compiled
//! [`FilePattern`], parses the timestamp each name embeds, and deletes all
//! but the newest `keep`.

use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{io_err, SinkError};
use crate::pattern::FilePattern;

/// Deletes the oldest archives beyond a retention count.
#[derive(Debug, Clone)]
pub struct Pruner {
    pattern: FilePattern,
    keep: usize,
}

impl Pruner {
    pub fn new(pattern: FilePattern, keep: usize) -> Self {
        Self { pattern, keep }
    }

    /// Delete every archive matching the pattern except the `keep` most
    /// recent (by embedded timestamp). Returns the number of files deleted.
    ///
    /// Names that match the pattern but whose embedded text does not parse
    /// under the date format are skipped with a warning, never deleted.
    pub fn delete_old_files(&self) -> Result<usize, SinkError> {
        let dir = self.pattern.directory();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(io_err(&dir, err)),
        };

        let mut archives: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = self.pattern.extract_date_token(name) else {
                continue;
            };
            match parse_stamp(stamp, self.pattern.date_format()) {
                Some(ts) => archives.push((ts, entry.path())),
                None => {
                    tracing::warn!(
                        file = name,
                        format = self.pattern.date_format(),
                        "archive name matches pattern but timestamp does not parse; skipping",
                    );
                }
            }
        }

        // Newest first; ties broken by name so the order is stable.
        archives.sort_by(|a, b| b.cmp(a));

        let mut deleted = 0;
        for (_, path) in archives.iter().skip(self.keep) {
            match fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "pruned old archive");
                    deleted += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(path, err)),
            }
        }
        Ok(deleted)
    }
}

/// Parse an embedded timestamp under `format`, defaulting omitted smaller
/// units to their period start (midnight, first of month, January 1st).
fn parse_stamp(stamp: &str, format: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(stamp, format) {
        return Some(ts);
    }
    // Hour-only and minute-only formats: pad the missing time fields.
    for (fmt_pad, stamp_pad) in [("%M%S", "0000"), ("%S", "00")] {
        let padded = format!("{stamp}{stamp_pad}");
        if let Ok(ts) = NaiveDateTime::parse_from_str(&padded, &format!("{format}{fmt_pad}")) {
            return Some(ts);
        }
    }
    // Date-only, month-only, and year-only formats.
    if let Ok(date) = NaiveDate::parse_from_str(stamp, format) {
        return date.and_hms_opt(0, 0, 0);
    }
    for (fmt_pad, stamp_pad) in [("%d", "01"), ("%m%d", "0101")] {
        let padded = format!("{stamp}{stamp_pad}");
        if let Ok(date) = NaiveDate::parse_from_str(&padded, &format!("{format}{fmt_pad}")) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}
