// Export modules for use in tests
pub mod config;
pub mod engine;
pub mod task;
pub mod undo;

// Re-export the pieces a frontend wires together
pub use config::Config;
pub use engine::{DocumentEngine, DocumentHandle, LopdfEngine};
pub use task::{
    SubmitOutcome, TaskDispatcher, TaskEvent, TaskId, TaskMode, TaskOutcome, TaskParams,
};
pub use undo::UndoManager;
