//! Depth-first operation scheduling with undo and redo.
//!
//! The [`OperationManager`] walks the tree rooted at its root operation:
//! each node runs its pre-extensions, its dynamic pre-children, itself,
//! its dynamic post-children and its post-extensions. Traversal state lives
//! on an explicit stack inside the current [`Run`], so a listener can
//! suspend work and a later call resumes at the same point.
//!
//! Every executed operation is recorded in the run. Undo walks that record
//! in exact reverse order; redo replays it forward.

mod config;
mod listeners;
mod manager;
mod run;
mod traversal;

pub use config::{RollbackScope, SchedulerConfig};
pub use listeners::{Flow, OperationListener};
pub use manager::{OperationManager, OperationManagerBuilder};
pub use run::{
    ExecutedStep, RedoReport, Run, RunHistory, RunOutcome, RunState, SweepReport, UndoReport,
};
pub use traversal::TraversalNode;
