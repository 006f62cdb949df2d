//! Background task subsystem
//!
//! One task runs at a time on a dedicated worker thread. The
//! [`dispatcher::TaskDispatcher`] is the caller-side façade: it validates
//! inputs, spawns the [`runner`], relays throttled progress events over a
//! channel and registers successful undoable work with the undo manager.

pub mod atomic_write;
pub mod dispatcher;
pub mod handlers;
pub mod page_range;
pub mod preflight;
pub mod progress;
pub mod request;
pub mod runner;

pub use dispatcher::{SubmitOutcome, TaskDispatcher};
pub use page_range::{ParsedRange, parse_page_range};
pub use preflight::SizeLimits;
pub use progress::ProgressThrottle;
pub use request::{TaskError, TaskErrorKind, TaskEvent, TaskId, TaskMode, TaskOutcome, TaskParams};
pub use runner::CancelFlag;

use std::time::Duration;

/// Hard cap on pages produced by one range string
pub const MAX_PAGE_RANGE_LENGTH: usize = 1000;

/// Largest accepted input file (2 GiB)
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Anything under this many bytes cannot be a valid PDF
pub const MIN_PDF_SIZE: u64 = 100;

/// After a cancellation, an output younger than this is assumed to be the
/// cancelled task's partial work and gets removed.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// A4 portrait in PDF points, used for inserted blank pages
pub const DEFAULT_PAGE_SIZE: (f32, f32) = (595.0, 842.0);

/// Grid spacing for tiled watermarks, in points
pub const WATERMARK_TILE_SPACING_X: f32 = 300.0;
pub const WATERMARK_TILE_SPACING_Y: f32 = 200.0;
