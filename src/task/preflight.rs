//! Input validation run before any task work begins
//!
//! A failed preflight never spawns a worker and never touches the engine, so
//! bad inputs are reported with zero filesystem side effects.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::request::TaskError;
use super::{MAX_FILE_SIZE, MIN_PDF_SIZE};

/// Size bounds applied to every input file
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SizeLimits {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_min_pdf_size")]
    pub min_pdf_size: u64,
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_min_pdf_size() -> u64 {
    MIN_PDF_SIZE
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            min_pdf_size: MIN_PDF_SIZE,
        }
    }
}

/// Check that `path` exists and sits within the size bounds.
///
/// Checks run in a fixed order: existence, upper bound, lower bound. An
/// undersized file is treated as corrupt; no real PDF fits in under
/// [`MIN_PDF_SIZE`] bytes.
pub fn validate(path: &Path, limits: &SizeLimits) -> Result<(), TaskError> {
    if path.as_os_str().is_empty() {
        return Err(TaskError::NotFound(path.to_path_buf()));
    }
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => return Err(TaskError::from_io(e, path)),
    };
    if !meta.is_file() {
        return Err(TaskError::NotFound(path.to_path_buf()));
    }

    let size = meta.len();
    if size > limits.max_file_size {
        return Err(TaskError::TooLarge {
            actual: size,
            limit: limits.max_file_size,
        });
    }
    if size < limits.min_pdf_size {
        return Err(TaskError::TooSmall {
            actual: size,
            limit: limits.min_pdf_size,
        });
    }
    Ok(())
}
