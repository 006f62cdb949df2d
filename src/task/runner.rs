//! Task execution on the worker thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::Sender;
use log::{info, warn};

use crate::engine::DocumentEngine;

use super::handlers;
use super::preflight::SizeLimits;
use super::progress::ProgressThrottle;
use super::request::{TaskError, TaskEvent, TaskId, TaskMode, TaskOutcome, TaskParams};

/// Shared cancellation flag, cloned into the worker thread.
///
/// Cancellation is cooperative: handlers call [`CancelFlag::checkpoint`] at
/// every loop iteration and bail out with `?`, so a task stops at the next
/// safe point rather than mid-write.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Err([`TaskError::Cancelled`]) once a cancel has been requested
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_requested() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Throttled progress reporter owned by the running task
pub struct Progress {
    id: TaskId,
    events: Sender<TaskEvent>,
    throttle: ProgressThrottle,
}

impl Progress {
    #[must_use]
    pub fn new(id: TaskId, events: Sender<TaskEvent>, throttle: ProgressThrottle) -> Self {
        Self {
            id,
            events,
            throttle,
        }
    }

    /// Report completion in `[0, 100]`; the throttle decides delivery.
    /// A closed channel is ignored, the terminal event handles shutdown.
    pub fn report(&mut self, value: i64) {
        if let Some(value) = self.throttle.admit(value) {
            let _ = self.events.send(TaskEvent::Progress { id: self.id, value });
        }
    }

    /// Report `done` of `total` mapped onto the `[lo, hi]` percent span
    pub fn report_span(&mut self, done: usize, total: usize, lo: i64, hi: i64) {
        let total = total.max(1) as i64;
        let done = (done as i64).min(total);
        self.report(lo + (hi - lo) * done / total);
    }
}

/// Everything a handler needs, injected rather than reached for
pub struct TaskCtx<'a> {
    pub engine: &'a dyn DocumentEngine,
    pub params: &'a TaskParams,
    pub cancel: &'a CancelFlag,
    pub progress: &'a mut Progress,
    pub limits: &'a SizeLimits,
}

/// Entry point of the worker thread. Runs the handler for `mode` and always
/// delivers exactly one terminal [`TaskEvent::Finished`], as the last event
/// for this task id.
pub fn run_task(
    id: TaskId,
    mode: TaskMode,
    params: &TaskParams,
    engine: &dyn DocumentEngine,
    cancel: &CancelFlag,
    events: &Sender<TaskEvent>,
    limits: &SizeLimits,
    throttle: ProgressThrottle,
) {
    info!("task {id:?} started: {}", mode.as_str());
    let mut progress = Progress::new(id, events.clone(), throttle);

    let mut ctx = TaskCtx {
        engine,
        params,
        cancel,
        progress: &mut progress,
        limits,
    };

    let outcome = match handlers::execute(mode, &mut ctx) {
        Ok(message) => {
            progress.report(100);
            info!("task {id:?} succeeded");
            TaskOutcome::Succeeded(message)
        }
        Err(err) => {
            match &err {
                TaskError::Cancelled => info!("task {id:?} cancelled"),
                other => warn!("task {id:?} failed: {other}"),
            }
            TaskOutcome::from_error(&err)
        }
    };

    let _ = events.send(TaskEvent::Finished { id, outcome });
}
