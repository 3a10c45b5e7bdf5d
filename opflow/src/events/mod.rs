//! Event sink system for observability.
//!
//! The scheduler reports run and operation lifecycle events through an
//! injected [`EventSink`]; the default discards them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the scheduler.
pub mod names {
    /// A run was pushed onto the history.
    pub const RUN_STARTED: &str = "run.started";
    /// Traversal stopped with work left on the stack.
    pub const RUN_SUSPENDED: &str = "run.suspended";
    /// The traversal stack emptied.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A run was undone.
    pub const RUN_ROLLED_BACK: &str = "run.rolled_back";
    /// An operation is about to execute.
    pub const OPERATION_STARTED: &str = "operation.started";
    /// An operation executed with a non-failing status.
    pub const OPERATION_COMPLETED: &str = "operation.completed";
    /// An operation executed with an error or fatal status.
    pub const OPERATION_FAILED: &str = "operation.failed";
    /// A listener stopped traversal at an operation.
    pub const OPERATION_VETOED: &str = "operation.vetoed";
    /// An operation was undone.
    pub const OPERATION_UNDONE: &str = "operation.undone";
    /// An operation was skipped during undo because it is not undoable.
    pub const OPERATION_UNDO_SKIPPED: &str = "operation.undo_skipped";
    /// An operation was redone.
    pub const OPERATION_REDONE: &str = "operation.redone";
}
