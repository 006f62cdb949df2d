//! Crash-safe output writing
//!
//! Output is produced in a temporary file next to the destination and moved
//! into place with a rename, so the destination only ever holds either its
//! previous bytes or the complete new ones. When a task overwrites its own
//! input and the backend still holds a read handle on it, the rename can fail
//! with a permission error on some platforms; the writer releases the source
//! handle and retries the rename once.

use std::io::ErrorKind;
use std::path::Path;

use log::{debug, warn};
use tempfile::TempPath;

use crate::engine::{DocumentHandle, SaveOptions};

use super::request::TaskError;
use super::runner::CancelFlag;

/// Stage output via `write`, then rename over `dest`.
///
/// `write` receives the temporary path and must produce the complete file
/// there. On any error, and on cancellation before the rename, the temporary
/// file is removed and `dest` is left untouched.
pub fn atomic_write<F>(dest: &Path, cancel: &CancelFlag, write: F) -> Result<(), TaskError>
where
    F: FnOnce(&Path) -> Result<(), TaskError>,
{
    cancel.checkpoint()?;
    let tmp = stage_path(dest)?;
    write(&tmp)?;
    cancel.checkpoint()?;

    tmp.persist(dest)
        .map_err(|e| TaskError::from_io(e.error, dest))?;
    debug!("atomically replaced {}", dest.display());
    Ok(())
}

/// Atomic variant for saving a document handle, with the overwrite-in-place
/// permission retry.
pub fn atomic_save_doc(
    dest: &Path,
    cancel: &CancelFlag,
    doc: &mut dyn DocumentHandle,
    options: &SaveOptions,
) -> Result<(), TaskError> {
    cancel.checkpoint()?;
    let tmp = stage_path(dest)?;
    doc.save(&tmp, options)?;
    cancel.checkpoint()?;

    let overwrites_source = doc.source_path() == Some(dest);
    match tmp.persist(dest) {
        Ok(()) => {}
        Err(e) if e.error.kind() == ErrorKind::PermissionDenied && overwrites_source => {
            warn!(
                "rename over {} denied while the source is open; releasing and retrying",
                dest.display()
            );
            doc.release_source();
            e.path
                .persist(dest)
                .map_err(|_| TaskError::PermissionDenied(dest.to_path_buf()))?;
        }
        Err(e) => return Err(TaskError::from_io(e.error, dest)),
    }
    debug!("atomically replaced {}", dest.display());
    Ok(())
}

/// Temporary file in the destination's directory, so the final rename never
/// crosses a filesystem boundary.
fn stage_path(dest: &Path) -> Result<TempPath, TaskError> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| TaskError::from_io(e, dir))?;

    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{stem}-"))
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| TaskError::from_io(e, dir))?;
    Ok(tmp.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::request::TaskErrorKind;

    fn flag() -> CancelFlag {
        CancelFlag::new()
    }

    #[test]
    fn writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        atomic_write(&dest, &flag(), |tmp| {
            std::fs::write(tmp, b"fresh bytes").map_err(|e| TaskError::from_io(e, tmp))
        })
        .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh bytes");
    }

    #[test]
    fn failed_write_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        std::fs::write(&dest, b"previous").unwrap();

        let err = atomic_write(&dest, &flag(), |tmp| {
            std::fs::write(tmp, b"half-done").map_err(|e| TaskError::from_io(e, tmp))?;
            Err(TaskError::Unexpected("boom".into()))
        })
        .unwrap_err();

        assert_eq!(err.kind(), TaskErrorKind::Unexpected);
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }

    #[test]
    fn no_stray_temp_files_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        let _ = atomic_write(&dest, &flag(), |_| Err(TaskError::Unexpected("boom".into())));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "found {leftovers:?}");
    }

    #[test]
    fn cancellation_before_rename_preserves_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        std::fs::write(&dest, b"previous").unwrap();

        let cancel = flag();
        let err = atomic_write(&dest, &cancel, |tmp| {
            std::fs::write(tmp, b"half-done").map_err(|e| TaskError::from_io(e, tmp))?;
            cancel.request();
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.kind(), TaskErrorKind::Cancelled);
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }

    #[test]
    fn cancellation_before_write_skips_the_closure() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = flag();
        cancel.request();
        let mut ran = false;
        let err = atomic_write(&dir.path().join("out.pdf"), &cancel, |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::Cancelled);
        assert!(!ran);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/deeper/out.pdf");
        atomic_write(&dest, &flag(), |tmp| {
            std::fs::write(tmp, b"x").map_err(|e| TaskError::from_io(e, tmp))
        })
        .unwrap();
        assert!(dest.is_file());
    }
}
