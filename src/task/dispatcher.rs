//! Caller-side task façade
//!
//! Owns the single worker slot, the event channel and the undo history. At
//! most one task runs at a time; a submit while busy lands in the pending
//! slot, replacing whatever was waiting there. Undo backups for undoable
//! modes are taken before the worker starts, so the snapshot always holds
//! the pre-task bytes.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use crate::config::{Config, ThrottleConfig};
use crate::engine::DocumentEngine;
use crate::undo::{ActionRecord, FileState, UndoConfig, UndoError, UndoManager};

use super::preflight::{self, SizeLimits};
use super::request::{TaskEvent, TaskId, TaskMode, TaskOutcome, TaskParams};
use super::runner::{self, CancelFlag};

const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// What happened to a [`TaskDispatcher::submit`] call
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The task is running (or already finished with an immediate failure);
    /// watch `poll_events` for its progress and terminal event.
    Started(TaskId),
    /// Another task is in flight; this one waits in the pending slot
    Queued,
    /// Could not be accepted at all; nothing was spawned
    Rejected(String),
}

struct InFlight {
    id: TaskId,
    mode: TaskMode,
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
    /// Primary output file, for post-cancel cleanup
    output: Option<PathBuf>,
    /// Undo record to publish if the task succeeds
    staged: Option<ActionRecord>,
}

pub struct TaskDispatcher {
    engine: Arc<dyn DocumentEngine>,
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
    undo: UndoManager,
    limits: SizeLimits,
    throttle: ThrottleConfig,
    cancel_grace: Duration,
    next_id: u64,
    in_flight: Option<InFlight>,
    pending: Option<(TaskMode, TaskParams)>,
}

impl TaskDispatcher {
    pub fn new(engine: Arc<dyn DocumentEngine>, config: &Config) -> Result<Self, UndoError> {
        let (events_tx, events_rx) = flume::unbounded();
        Ok(Self {
            engine,
            events_tx,
            events_rx,
            undo: UndoManager::new(&config.undo)?,
            limits: config.limits,
            throttle: config.throttle.clone(),
            cancel_grace: config.cancel_grace(),
            next_id: 0,
            in_flight: None,
            pending: None,
        })
    }

    /// Convenience constructor with default limits and history
    pub fn with_defaults(engine: Arc<dyn DocumentEngine>) -> Result<Self, UndoError> {
        Self::new(engine, &Config::default())
    }

    /// In-test constructor keeping backups inside a caller-chosen directory
    pub fn with_backup_dir(
        engine: Arc<dyn DocumentEngine>,
        backup_dir: PathBuf,
    ) -> Result<Self, UndoError> {
        let config = Config {
            undo: UndoConfig {
                backup_dir: Some(backup_dir),
                ..UndoConfig::default()
            },
            ..Config::default()
        };
        Self::new(engine, &config)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn undo_manager(&self) -> &UndoManager {
        &self.undo
    }

    /// Submit a task. While one is in flight the pending slot is replaced,
    /// never queued deeper than one.
    pub fn submit(&mut self, mode: TaskMode, params: TaskParams) -> SubmitOutcome {
        if self.in_flight.is_some() {
            if self.pending.is_some() {
                debug!("replacing pending {} request", mode.as_str());
            }
            self.pending = Some((mode, params));
            return SubmitOutcome::Queued;
        }
        self.start(mode, params)
    }

    fn start(&mut self, mode: TaskMode, params: TaskParams) -> SubmitOutcome {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;

        // Validate before anything is spawned or touched
        let inputs = mode.input_paths(&params);
        for path in &inputs {
            if let Err(err) = preflight::validate(path, &self.limits) {
                info!("task {id:?} rejected in preflight: {err}");
                self.in_flight = Some(InFlight {
                    id,
                    mode,
                    cancel: CancelFlag::new(),
                    worker: None,
                    output: None,
                    staged: None,
                });
                let _ = self.events_tx.send(TaskEvent::Finished {
                    id,
                    outcome: TaskOutcome::from_error(&err),
                });
                return SubmitOutcome::Started(id);
            }
        }

        // Only an explicit output is tracked for post-cancel cleanup; the
        // primary input is never a cleanup candidate.
        let output = params.path("output_path").ok();

        let staged = if mode.is_undoable() {
            match self.stage_undo(mode, &params) {
                Ok(record) => record,
                Err(e) => {
                    warn!("cannot stage undo backup for {}: {e}", mode.as_str());
                    return SubmitOutcome::Rejected(format!("cannot create undo backup: {e}"));
                }
            }
        } else {
            None
        };

        let cancel = CancelFlag::new();
        let worker = {
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            let events = self.events_tx.clone();
            let limits = self.limits;
            let throttle = self.throttle.build();
            std::thread::spawn(move || {
                runner::run_task(
                    id,
                    mode,
                    &params,
                    engine.as_ref(),
                    &cancel,
                    &events,
                    &limits,
                    throttle,
                );
            })
        };

        self.in_flight = Some(InFlight {
            id,
            mode,
            cancel,
            worker: Some(worker),
            output,
            staged,
        });
        SubmitOutcome::Started(id)
    }

    /// Back up the task's primary file and build the record to publish on
    /// success. Both states restore onto the task's output, so undo and redo
    /// never rewrite the input of a distinct-output task. Modes without a
    /// `file_path` on disk get no record.
    fn stage_undo(
        &self,
        mode: TaskMode,
        params: &TaskParams,
    ) -> Result<Option<ActionRecord>, UndoError> {
        let Ok(source) = params.path("file_path") else {
            return Ok(None);
        };
        if !source.is_file() {
            return Ok(None);
        }
        let output = params.path("output_path").unwrap_or_else(|_| source.clone());
        let backup = self.undo.backups().create_backup(&source)?;
        Ok(Some(ActionRecord::file_restore(
            mode,
            FileState {
                snapshot: backup,
                target: output.clone(),
            },
            FileState {
                snapshot: output.clone(),
                target: output,
            },
        )))
    }

    /// Drain the event channel. Events from anything but the current task are
    /// discarded; a terminal event for the current task releases the slot,
    /// publishes the staged undo record and auto-starts any pending request.
    pub fn poll_events(&mut self) -> Vec<TaskEvent> {
        let drained: Vec<TaskEvent> = self.events_rx.try_iter().collect();
        let mut out = Vec::with_capacity(drained.len());

        for event in drained {
            let current = self.in_flight.as_ref().map(|t| t.id);
            match event {
                TaskEvent::Progress { id, .. } if Some(id) != current => {
                    debug!("discarding stale progress for {id:?}");
                }
                TaskEvent::Finished { id, .. } if Some(id) != current => {
                    debug!("discarding stale terminal event for {id:?}");
                }
                TaskEvent::Finished { id, outcome } => {
                    self.finish(&outcome);
                    out.push(TaskEvent::Finished { id, outcome });
                }
                progress => out.push(progress),
            }
        }

        if self.in_flight.is_none() {
            if let Some((mode, params)) = self.pending.take() {
                info!("starting pending {} request", mode.as_str());
                let _ = self.start(mode, params);
            }
        }
        out
    }

    fn finish(&mut self, outcome: &TaskOutcome) {
        let Some(mut task) = self.in_flight.take() else {
            return;
        };
        if let Some(worker) = task.worker.take() {
            if worker.join().is_err() {
                warn!("worker thread for {:?} panicked", task.id);
            }
        }

        match outcome {
            TaskOutcome::Succeeded(_) => {
                if let Some(record) = task.staged.take() {
                    self.undo.push(record);
                }
            }
            TaskOutcome::Cancelled(_) => {
                if let Some(record) = task.staged.take() {
                    self.undo.backups().remove(&record.before.snapshot);
                }
                if let Some(output) = &task.output {
                    self.discard_fresh_output(output);
                }
                info!("task {:?} ({}) cancelled", task.id, task.mode.as_str());
            }
            TaskOutcome::Failed { .. } => {
                if let Some(record) = task.staged.take() {
                    self.undo.backups().remove(&record.before.snapshot);
                }
            }
        }
    }

    /// After a cancel, an output written moments ago is the cancelled task's
    /// partial work; anything older is a pre-existing file the user owns.
    fn discard_fresh_output(&self, output: &std::path::Path) {
        let fresh = std::fs::metadata(output)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age <= self.cancel_grace);
        if fresh {
            match std::fs::remove_file(output) {
                Ok(()) => info!("removed partial output {}", output.display()),
                Err(e) => warn!("could not remove partial output {}: {e}", output.display()),
            }
        }
    }

    /// Ask the running task to stop at its next checkpoint
    pub fn request_cancel(&mut self) -> bool {
        match &self.in_flight {
            Some(task) => {
                info!("cancel requested for {:?}", task.id);
                task.cancel.request();
                true
            }
            None => false,
        }
    }

    pub fn undo(&mut self) -> Result<ActionRecord, UndoError> {
        if self.in_flight.is_some() {
            return Err(UndoError::Busy);
        }
        self.undo.undo()
    }

    pub fn redo(&mut self) -> Result<ActionRecord, UndoError> {
        if self.in_flight.is_some() {
            return Err(UndoError::Busy);
        }
        self.undo.redo()
    }

    /// Cancel any running work, wait briefly for the worker, and run the
    /// final backup sweep.
    pub fn shutdown(mut self) {
        self.request_cancel();
        if let Some(task) = self.in_flight.take() {
            if let Some(worker) = task.worker {
                let deadline = Instant::now() + SHUTDOWN_WAIT;
                while !worker.is_finished() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(10));
                }
                if worker.is_finished() {
                    let _ = worker.join();
                } else {
                    warn!("worker for {:?} still running at shutdown", task.id);
                }
            }
        }
        let swept = self.undo.sweep_unused_backups();
        if swept > 0 {
            debug!("swept {swept} unused backup(s) at shutdown");
        }
    }
}
