//! Backup snapshots backing the undo history
//!
//! Snapshots live in one flat directory under the platform temp dir. Every
//! file is named `undo_<salt>_<original basename>` so a crashed session's
//! leftovers are recognizable and the original name survives for debugging.
//! Three garbage-collection passes keep the directory bounded: by age and by
//! total size at startup, when no live record references anything, and a
//! final sweep of unreferenced files at shutdown. Snapshots are never evicted
//! mid-session; every record on either stack keeps its backup on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use walkdir::WalkDir;

use super::UndoError;

const BACKUP_PREFIX: &str = "undo_";

#[derive(Debug)]
pub struct BackupStore {
    dir: PathBuf,
    max_age: Duration,
    max_total_bytes: u64,
}

impl BackupStore {
    pub fn new(dir: PathBuf, max_age: Duration, max_total_bytes: u64) -> Result<Self, UndoError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_age,
            max_total_bytes,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `original` byte-for-byte
    pub fn create_backup(&self, original: &Path) -> Result<PathBuf, UndoError> {
        let basename = original
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let salt: u64 = rand::random();
        let backup = self.dir.join(format!("{BACKUP_PREFIX}{salt:016x}_{basename}"));
        std::fs::copy(original, &backup)?;
        debug!("backed up {} to {}", original.display(), backup.display());
        Ok(backup)
    }

    /// Best-effort removal; a vanished backup is not an error
    pub fn remove(&self, backup: &Path) {
        match std::fs::remove_file(backup) {
            Ok(()) => debug!("removed backup {}", backup.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove backup {}: {e}", backup.display()),
        }
    }

    /// Age pass: drop snapshots older than `max_age`. Run at startup to clear
    /// leftovers from previous sessions.
    pub fn sweep_aged(&self) -> usize {
        let cutoff = SystemTime::now() - self.max_age;
        let mut removed = 0;
        for (path, mtime, _) in self.entries() {
            if mtime < cutoff {
                self.remove(&path);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("aged out {removed} backup(s)");
        }
        removed
    }

    /// Size pass: remove oldest-by-mtime snapshots until the directory total
    /// fits under the cap. Run at startup only, when the stacks are empty and
    /// nothing in the directory is still referenced.
    pub fn enforce_size_cap(&self) {
        let mut entries = self.entries();
        let mut total: u64 = entries.iter().map(|(_, _, len)| len).sum();
        if total <= self.max_total_bytes {
            return;
        }
        entries.sort_by_key(|(_, mtime, _)| *mtime);
        for (path, _, len) in entries {
            if total <= self.max_total_bytes {
                break;
            }
            self.remove(&path);
            total = total.saturating_sub(len);
        }
    }

    /// Shutdown pass: drop every snapshot no live record points at
    pub fn sweep_unreferenced(&self, referenced: &HashSet<PathBuf>) -> usize {
        let mut removed = 0;
        for (path, _, _) in self.entries() {
            if !referenced.contains(&path) {
                self.remove(&path);
                removed += 1;
            }
        }
        removed
    }

    fn entries(&self) -> Vec<(PathBuf, SystemTime, u64)> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_type().is_file()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with(BACKUP_PREFIX))
            })
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let mtime = meta.modified().ok()?;
                Some((e.into_path(), mtime, meta.len()))
            })
            .collect()
    }
}
