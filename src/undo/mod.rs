//! Undo/redo history over file snapshots
//!
//! Every undoable task is recorded as an [`ActionRecord`] holding the file
//! state before (a backup snapshot) and after (the task's output) plus the
//! command object that knows how to move between the two. Stacks are bounded;
//! trimmed and superseded records release their snapshots immediately.

pub mod backups;

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::task::TaskMode;

use backups::BackupStore;

#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("a task is still running")]
    Busy,

    #[error("backup file is gone: {}", .0.display())]
    BackupMissing(PathBuf),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// History bounds, serialized as part of the application config
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Snapshots older than this are dropped at startup
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// Total snapshot bytes kept on disk
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
    /// Snapshot directory; defaults to a fixed folder under the temp dir
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

fn default_max_history() -> usize {
    50
}

fn default_max_age_hours() -> u64 {
    24
}

fn default_max_total_bytes() -> u64 {
    500 * 1024 * 1024
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_age_hours: default_max_age_hours(),
            max_total_bytes: default_max_total_bytes(),
            backup_dir: None,
        }
    }
}

/// A file identity plus the bytes to put there
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileState {
    /// Where the bytes live: the backup snapshot (before) or the task
    /// output (after)
    pub snapshot: PathBuf,
    /// The file the action rewrites
    pub target: PathBuf,
}

/// Command object moving a file between its before and after states
pub trait UndoAction: Send + Sync {
    fn undo(&self, before: &FileState, after: &FileState) -> Result<(), UndoError>;

    fn redo(&self, before: &FileState, after: &FileState) -> Result<(), UndoError>;
}

/// Default action: plain byte-for-byte restores
pub struct FileRestore;

impl UndoAction for FileRestore {
    fn undo(&self, before: &FileState, _after: &FileState) -> Result<(), UndoError> {
        if !before.snapshot.is_file() {
            return Err(UndoError::BackupMissing(before.snapshot.clone()));
        }
        std::fs::copy(&before.snapshot, &before.target)?;
        Ok(())
    }

    fn redo(&self, _before: &FileState, after: &FileState) -> Result<(), UndoError> {
        if !after.snapshot.is_file() {
            return Err(UndoError::BackupMissing(after.snapshot.clone()));
        }
        // The after snapshot is the output file itself; fs::copy truncates
        // the destination first, so copying a path onto itself would empty it
        if after.snapshot != after.target {
            std::fs::copy(&after.snapshot, &after.target)?;
        }
        Ok(())
    }
}

/// One completed undoable task
#[derive(Clone)]
pub struct ActionRecord {
    pub mode: TaskMode,
    pub description: String,
    pub timestamp: DateTime<Local>,
    pub before: FileState,
    pub after: FileState,
    pub action: Arc<dyn UndoAction>,
}

impl ActionRecord {
    #[must_use]
    pub fn file_restore(mode: TaskMode, before: FileState, after: FileState) -> Self {
        Self {
            mode,
            description: mode.description().to_string(),
            timestamp: Local::now(),
            before,
            after,
            action: Arc::new(FileRestore),
        }
    }
}

impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("mode", &self.mode)
            .field("description", &self.description)
            .field("timestamp", &self.timestamp)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

pub struct UndoManager {
    undo_stack: Vec<ActionRecord>,
    redo_stack: Vec<ActionRecord>,
    max_history: usize,
    backups: BackupStore,
}

impl UndoManager {
    /// Build the manager and run the startup sweeps (age, then total size)
    pub fn new(config: &UndoConfig) -> Result<Self, UndoError> {
        let dir = config
            .backup_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pdfmill_undo"));
        let backups = BackupStore::new(
            dir,
            Duration::from_secs(config.max_age_hours * 3600),
            config.max_total_bytes,
        )?;
        let aged = backups.sweep_aged();
        if aged > 0 {
            info!("discarded {aged} stale backup(s) from previous sessions");
        }
        backups.enforce_size_cap();
        Ok(Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_history: config.max_history.max(1),
            backups,
        })
    }

    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    #[must_use]
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|r| r.description.as_str())
    }

    #[must_use]
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|r| r.description.as_str())
    }

    /// Register a completed task. New work invalidates the redo branch and
    /// its snapshots; history past `max_history` falls off the old end.
    pub fn push(&mut self, record: ActionRecord) {
        for stale in self.redo_stack.drain(..) {
            self.backups.remove(&stale.before.snapshot);
        }
        self.undo_stack.push(record);
        while self.undo_stack.len() > self.max_history {
            let trimmed = self.undo_stack.remove(0);
            self.backups.remove(&trimmed.before.snapshot);
        }
    }

    /// Revert the most recent action. On failure the record stays on the
    /// undo stack so the user can retry.
    pub fn undo(&mut self) -> Result<ActionRecord, UndoError> {
        let record = self.undo_stack.pop().ok_or(UndoError::NothingToUndo)?;
        if let Err(e) = record.action.undo(&record.before, &record.after) {
            warn!("undo of {:?} failed: {e}", record.mode);
            self.undo_stack.push(record);
            return Err(e);
        }
        info!("undid {:?}", record.mode);
        self.redo_stack.push(record.clone());
        Ok(record)
    }

    /// Re-apply the most recently undone action; mirror image of [`Self::undo`]
    pub fn redo(&mut self) -> Result<ActionRecord, UndoError> {
        let record = self.redo_stack.pop().ok_or(UndoError::NothingToRedo)?;
        if let Err(e) = record.action.redo(&record.before, &record.after) {
            warn!("redo of {:?} failed: {e}", record.mode);
            self.redo_stack.push(record);
            return Err(e);
        }
        info!("redid {:?}", record.mode);
        self.undo_stack.push(record.clone());
        Ok(record)
    }

    /// Drop the whole history; snapshots become orphans for the final sweep
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Shutdown pass: delete every snapshot no record references
    pub fn sweep_unused_backups(&self) -> usize {
        let referenced: HashSet<PathBuf> = self
            .undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(|r| r.before.snapshot.clone())
            .collect();
        self.backups.sweep_unreferenced(&referenced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingAction;

    impl UndoAction for FailingAction {
        fn undo(&self, _: &FileState, _: &FileState) -> Result<(), UndoError> {
            Err(UndoError::Io(std::io::Error::other("disk on fire")))
        }

        fn redo(&self, _: &FileState, _: &FileState) -> Result<(), UndoError> {
            Ok(())
        }
    }

    fn manager(dir: &std::path::Path) -> UndoManager {
        manager_with_history(dir, 50)
    }

    fn manager_with_history(dir: &std::path::Path, max_history: usize) -> UndoManager {
        let config = UndoConfig {
            max_history,
            backup_dir: Some(dir.join("backups")),
            ..UndoConfig::default()
        };
        UndoManager::new(&config).unwrap()
    }

    /// Simulate an undoable task: back up `target`, overwrite it, record it
    fn apply_edit(mgr: &mut UndoManager, target: &std::path::Path, new_bytes: &[u8]) -> ActionRecord {
        let backup = mgr.backups().create_backup(target).unwrap();
        std::fs::write(target, new_bytes).unwrap();
        let record = ActionRecord::file_restore(
            TaskMode::Rotate,
            FileState {
                snapshot: backup,
                target: target.to_path_buf(),
            },
            FileState {
                snapshot: target.to_path_buf(),
                target: target.to_path_buf(),
            },
        );
        mgr.push(record.clone());
        record
    }

    #[test]
    fn undo_restores_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        apply_edit(&mut mgr, &target, b"v2");
        assert_eq!(std::fs::read(&target).unwrap(), b"v2");

        mgr.undo().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"v1");
        assert!(mgr.can_redo());
        assert!(!mgr.can_undo());
    }

    #[test]
    fn startup_applies_the_size_cap_to_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("undo_deadbeef_doc.pdf"), vec![b'x'; 100]).unwrap();

        let config = UndoConfig {
            max_total_bytes: 50,
            backup_dir: Some(backups.clone()),
            ..UndoConfig::default()
        };
        UndoManager::new(&config).unwrap();
        assert!(
            !backups.join("undo_deadbeef_doc.pdf").exists(),
            "oversized leftovers go at startup"
        );
    }

    #[test]
    fn redo_unavailable_until_an_undo_happened() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        assert!(matches!(mgr.redo(), Err(UndoError::NothingToRedo)));
        assert!(matches!(mgr.undo(), Err(UndoError::NothingToUndo)));
    }

    #[test]
    fn redo_over_the_same_path_keeps_the_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        apply_edit(&mut mgr, &target, b"v2");
        mgr.undo().unwrap();

        mgr.redo().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"v1");
        assert!(mgr.can_undo());
    }

    #[test]
    fn push_clears_redo_and_its_backups() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        let first = apply_edit(&mut mgr, &target, b"v2");
        mgr.undo().unwrap();
        assert!(mgr.can_redo());

        apply_edit(&mut mgr, &target, b"v3");
        assert!(!mgr.can_redo());
        assert!(
            !first.before.snapshot.exists(),
            "superseded redo snapshot should be deleted"
        );
    }

    #[test]
    fn history_is_bounded_and_trims_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v0").unwrap();

        let mut mgr = manager_with_history(dir.path(), 2);
        let first = apply_edit(&mut mgr, &target, b"v1");
        apply_edit(&mut mgr, &target, b"v2");
        apply_edit(&mut mgr, &target, b"v3");

        assert!(!first.before.snapshot.exists());
        // Two undos left, the third hits empty
        mgr.undo().unwrap();
        mgr.undo().unwrap();
        assert!(matches!(mgr.undo(), Err(UndoError::NothingToUndo)));
    }

    #[test]
    fn failed_undo_keeps_the_record_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        let mut record = apply_edit(&mut mgr, &target, b"v2");
        record.action = Arc::new(FailingAction);
        mgr.clear();
        mgr.push(record);

        assert!(mgr.undo().is_err());
        assert!(mgr.can_undo(), "record must survive a failed undo");
        assert!(!mgr.can_redo());
    }

    #[test]
    fn missing_backup_surfaces_as_backup_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        let record = apply_edit(&mut mgr, &target, b"v2");
        std::fs::remove_file(&record.before.snapshot).unwrap();

        assert!(matches!(mgr.undo(), Err(UndoError::BackupMissing(_))));
    }

    #[test]
    fn unused_sweep_spares_referenced_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        std::fs::write(&target, b"v1").unwrap();

        let mut mgr = manager(dir.path());
        let live = apply_edit(&mut mgr, &target, b"v2");
        let orphan = mgr.backups().create_backup(&target).unwrap();

        assert_eq!(mgr.sweep_unused_backups(), 1);
        assert!(live.before.snapshot.exists());
        assert!(!orphan.exists());
    }
}
