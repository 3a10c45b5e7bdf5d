//! # Opflow
//!
//! A hierarchical operation scheduler with extension points and
//! transactional undo.
//!
//! Opflow runs a tree of operations depth-first and provides:
//!
//! - **Extension points**: Operations declared to run before or after another operation
//! - **Dynamic children**: Operations that ask for work to run around them
//! - **Resumable runs**: Listeners can suspend traversal; the next call resumes it
//! - **Transactional undo**: Runs are undone in exact reverse order, automatically on fatal failure
//! - **Resource fencing**: Operations hold hierarchical resource locks while running
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opflow::prelude::*;
//!
//! let catalog = ExtensionCatalog::new()
//!     .with_pre("project.build", "project.validate", || Arc::new(Validate::new()) as OperationRef)
//!     .with_post("project.build", "project.index", || Arc::new(Index::new()) as OperationRef);
//!
//! let mut manager = OperationManager::new(Arc::new(Build::new()), catalog)?;
//! let outcome = manager.run_operations().await;
//! if outcome.is_rolled_back() {
//!     eprintln!("build failed: {:?}", outcome.status.primary());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod extensions;
pub mod observability;
pub mod operations;
pub mod resources;
pub mod scheduler;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{ContextManager, ContextRegistry, DataContext, NoOpContextManager};
    pub use crate::core::{OperationStatus, OverallStatus, Severity};
    pub use crate::errors::{CycleDetectedError, OpflowError, StepFailure};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::extensions::{
        EntryId, ExtensionCatalog, ExtensionManifest, ExtensionPosition, ExtensionTable,
        OperationFactories,
    };
    pub use crate::observability::init_tracing;
    pub use crate::operations::{FnOperation, NullOperation, Operation, OperationRef, ProgressMonitor};
    pub use crate::resources::{ResourceLocks, ResourceToken};
    pub use crate::scheduler::{
        Flow, OperationListener, OperationManager, RollbackScope, RunOutcome, RunState,
        SchedulerConfig, UndoReport,
    };
    pub use std::sync::Arc;
}
