//! Task identifiers, modes, parameters and terminal outcomes

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::engine::EngineError;

/// Unique identifier for submitted tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The fixed, versioned set of operations the runner knows how to execute.
///
/// This enum is the command registry: submission strings map onto variants
/// via [`TaskMode::from_name`] and the runner dispatches with an exhaustive
/// `match`, so an unknown mode can never reach a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskMode {
    Merge,
    Split,
    SplitByPages,
    DeletePages,
    Rotate,
    Reorder,
    ReversePages,
    DuplicatePage,
    InsertBlankPage,
    PageNumbers,
    Watermark,
    Stamp,
    MetadataUpdate,
    Protect,
    Compress,
    ExtractText,
}

impl TaskMode {
    pub const ALL: [TaskMode; 16] = [
        TaskMode::Merge,
        TaskMode::Split,
        TaskMode::SplitByPages,
        TaskMode::DeletePages,
        TaskMode::Rotate,
        TaskMode::Reorder,
        TaskMode::ReversePages,
        TaskMode::DuplicatePage,
        TaskMode::InsertBlankPage,
        TaskMode::PageNumbers,
        TaskMode::Watermark,
        TaskMode::Stamp,
        TaskMode::MetadataUpdate,
        TaskMode::Protect,
        TaskMode::Compress,
        TaskMode::ExtractText,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Merge => "merge",
            TaskMode::Split => "split",
            TaskMode::SplitByPages => "split_by_pages",
            TaskMode::DeletePages => "delete_pages",
            TaskMode::Rotate => "rotate",
            TaskMode::Reorder => "reorder",
            TaskMode::ReversePages => "reverse_pages",
            TaskMode::DuplicatePage => "duplicate_page",
            TaskMode::InsertBlankPage => "insert_blank_page",
            TaskMode::PageNumbers => "page_numbers",
            TaskMode::Watermark => "watermark",
            TaskMode::Stamp => "stamp",
            TaskMode::MetadataUpdate => "metadata_update",
            TaskMode::Protect => "protect",
            TaskMode::Compress => "compress",
            TaskMode::ExtractText => "extract_text",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == name)
    }

    /// Short human description used in undo history and progress overlays
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            TaskMode::Merge => "Merge PDF files",
            TaskMode::Split => "Extract pages",
            TaskMode::SplitByPages => "Split PDF",
            TaskMode::DeletePages => "Delete pages",
            TaskMode::Rotate => "Rotate pages",
            TaskMode::Reorder => "Reorder pages",
            TaskMode::ReversePages => "Reverse page order",
            TaskMode::DuplicatePage => "Duplicate page",
            TaskMode::InsertBlankPage => "Insert blank page",
            TaskMode::PageNumbers => "Add page numbers",
            TaskMode::Watermark => "Apply watermark",
            TaskMode::Stamp => "Add stamp",
            TaskMode::MetadataUpdate => "Update metadata",
            TaskMode::Protect => "Encrypt PDF",
            TaskMode::Compress => "Compress PDF",
            TaskMode::ExtractText => "Extract text",
        }
    }

    /// Modes whose successful run is registered with the undo manager.
    /// All of them rewrite a single primary file into a single output.
    #[must_use]
    pub fn is_undoable(&self) -> bool {
        matches!(
            self,
            TaskMode::DeletePages
                | TaskMode::Rotate
                | TaskMode::Reorder
                | TaskMode::ReversePages
                | TaskMode::DuplicatePage
                | TaskMode::InsertBlankPage
                | TaskMode::PageNumbers
                | TaskMode::Watermark
                | TaskMode::Stamp
                | TaskMode::MetadataUpdate
                | TaskMode::Protect
                | TaskMode::Compress
        )
    }

    /// Input files the preflight validator checks before this mode runs
    #[must_use]
    pub fn input_paths(&self, params: &TaskParams) -> Vec<PathBuf> {
        match self {
            TaskMode::Merge => params.path_list("files").unwrap_or_default(),
            TaskMode::ExtractText => {
                if let Ok(paths) = params.path_list("file_paths") {
                    paths
                } else {
                    params.path("file_path").into_iter().collect()
                }
            }
            _ => params.path("file_path").into_iter().collect(),
        }
    }
}

/// Operation-specific key/value parameters, JSON-shaped like the requests
/// arriving from the UI layer.
#[derive(Clone, Debug, Default)]
pub struct TaskParams(Map<String, Value>);

impl TaskParams {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Accepts only a JSON object
    pub fn from_value(value: Value) -> Result<Self, TaskError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TaskError::Unexpected(format!(
                "task parameters must be a JSON object, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn missing(key: &str) -> TaskError {
        TaskError::Unexpected(format!("missing parameter `{key}`"))
    }

    pub fn str(&self, key: &str) -> Result<&str, TaskError> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Self::missing(key))
    }

    #[must_use]
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn path(&self, key: &str) -> Result<PathBuf, TaskError> {
        let raw = self.str(key)?;
        if raw.is_empty() {
            return Err(Self::missing(key));
        }
        Ok(PathBuf::from(raw))
    }

    pub fn path_list(&self, key: &str) -> Result<Vec<PathBuf>, TaskError> {
        let list = self
            .0
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| Self::missing(key))?;
        Ok(list
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    pub fn i64(&self, key: &str) -> Result<i64, TaskError> {
        self.0
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::missing(key))
    }

    #[must_use]
    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.0.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    #[must_use]
    pub fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.0
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn usize_list(&self, key: &str) -> Result<Vec<usize>, TaskError> {
        let list = self
            .0
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| Self::missing(key))?;
        list.iter()
            .map(|v| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| TaskError::Unexpected(format!("`{key}` must hold integers")))
            })
            .collect()
    }

    /// Three-component color tuple in `[0, 1]`
    #[must_use]
    pub fn color_or(&self, key: &str, default: (f32, f32, f32)) -> (f32, f32, f32) {
        let Some(list) = self.0.get(key).and_then(Value::as_array) else {
            return default;
        };
        let mut it = list.iter().filter_map(Value::as_f64).map(|v| v as f32);
        match (it.next(), it.next(), it.next()) {
            (Some(r), Some(g), Some(b)) => (r, g, b),
            _ => default,
        }
    }
}

/// Classification of terminal failures, stable across messages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskErrorKind {
    NotFound,
    TooLarge,
    TooSmall,
    PermissionDenied,
    CorruptInput,
    Cancelled,
    Unexpected,
}

/// Errors flowing out of handlers.
///
/// `Cancelled` doubles as the cooperative-cancellation control path: the
/// cancel flag's checkpoint returns it and handlers bail out with `?`, so
/// cancellation unwinds without panics or a separate channel.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("file too large: {actual} bytes (limit {limit})")]
    TooLarge { actual: u64, limit: u64 },

    #[error("file too small ({actual} bytes), likely corrupt")]
    TooSmall { actual: u64, limit: u64 },

    #[error("file access denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("document engine: {0}")]
    CorruptInput(String),

    #[error("task was cancelled by the user")]
    Cancelled,

    #[error("{0}")]
    Unexpected(String),
}

impl TaskError {
    #[must_use]
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::NotFound(_) => TaskErrorKind::NotFound,
            TaskError::TooLarge { .. } => TaskErrorKind::TooLarge,
            TaskError::TooSmall { .. } => TaskErrorKind::TooSmall,
            TaskError::PermissionDenied(_) => TaskErrorKind::PermissionDenied,
            TaskError::CorruptInput(_) => TaskErrorKind::CorruptInput,
            TaskError::Cancelled => TaskErrorKind::Cancelled,
            TaskError::Unexpected(_) => TaskErrorKind::Unexpected,
        }
    }

    /// Classify an io error raised while touching `path`
    #[must_use]
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => TaskError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                TaskError::PermissionDenied(path.to_path_buf())
            }
            _ => TaskError::Unexpected(err.to_string()),
        }
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(io) => TaskError::Unexpected(io.to_string()),
            e @ EngineError::Unsupported(_) => TaskError::Unexpected(e.to_string()),
            other => TaskError::CorruptInput(other.to_string()),
        }
    }
}

/// The single terminal result of a task run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(String),
    Failed {
        kind: TaskErrorKind,
        message: String,
    },
    Cancelled(String),
}

impl TaskOutcome {
    #[must_use]
    pub fn from_error(err: &TaskError) -> Self {
        match err.kind() {
            TaskErrorKind::Cancelled => TaskOutcome::Cancelled(err.to_string()),
            kind => TaskOutcome::Failed {
                kind,
                message: err.to_string(),
            },
        }
    }
}

/// Events delivered from the worker thread to the caller
#[derive(Clone, Debug)]
pub enum TaskEvent {
    /// Throttled progress in `[0, 100]`
    Progress { id: TaskId, value: u8 },

    /// Terminal event; always the last event for its task id
    Finished { id: TaskId, outcome: TaskOutcome },
}
