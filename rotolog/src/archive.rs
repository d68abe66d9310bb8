//! Size-rule archive renumbering.
//!
//! Archives are numbered siblings of the live file: `app.log.1` is the most
//! recently closed generation, higher ranks are older. During rotation the
//! live file is first renamed to the temporary sibling `app.log.rotating`,
//! which sorts as rank 0 and is destined for rank 1.
//!
//! The renumbering walk is not transactional: a crash between two renames
//! can leave a gap or a duplicate rank. Accepted limitation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{io_err, RotationError};

/// Suffix of the in-flight rotation file.
const TEMP_SUFFIX: &str = "rotating";

/// `<file>.rotating` next to the live file.
pub fn temp_path_for(live: &Path) -> PathBuf {
    live.with_file_name(format!("{}.{TEMP_SUFFIX}", base_name(live)))
}

/// Shift every numbered archive of `archive_base` up one rank, deleting
/// anything that would land beyond `max_files`. The temporary sibling of
/// `live` sorts first (rank 0) and becomes rank 1.
///
/// `archive_base` is usually `live` itself; a size-rule `oldFile` override
/// points it elsewhere.
///
/// Walks from the highest rank down so no rename clobbers a file that has
/// not moved yet.
pub fn renumber(live: &Path, archive_base: &Path, max_files: usize) -> Result<(), RotationError> {
    let dir = parent_dir(archive_base);
    let base = base_name(archive_base);

    let mut ranked: Vec<(usize, PathBuf)> = Vec::new();
    let temp = temp_path_for(live);
    if temp.exists() {
        ranked.push((0, temp));
    }
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(&dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rank) = rank_of(name, &base) else { continue };
        ranked.push((rank, entry.path()));
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    for (rank, path) in ranked {
        if rank >= max_files {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "dropped archive past retention"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&path, err)),
            }
            continue;
        }
        let target = archive_base.with_file_name(format!("{base}.{}", rank + 1));
        match fs::rename(&path, &target) {
            Ok(()) => {}
            // Another cooperating process may have moved it already.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "archive vanished mid-renumber");
            }
            Err(err) => {
                return Err(RotationError::Rename {
                    from: path,
                    to: target,
                    source: err,
                })
            }
        }
    }
    Ok(())
}

/// Rank of an archive file name: `<base>.N` is rank N. Anything else
/// (the live file, the temporary file) has no rank here; the temporary file
/// enters the walk explicitly as rank 0.
fn rank_of(name: &str, base: &str) -> Option<usize> {
    let suffix = name.strip_prefix(base)?.strip_prefix('.')?;
    suffix.parse().ok()
}

fn base_name(live: &Path) -> String {
    live.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("log")
        .to_string()
}

fn parent_dir(live: &Path) -> PathBuf {
    live.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
