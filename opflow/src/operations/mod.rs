//! Operation trait and implementations.
//!
//! Operations are the units of work the scheduler runs. Besides doing their
//! own work, an operation may declare dynamic children that must run right
//! before or after it, a set of context ids it owns, and a resource it must
//! hold exclusively while it runs.

mod progress;

pub use progress::ProgressMonitor;

use crate::core::OperationStatus;
use crate::resources::ResourceToken;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to an operation.
pub type OperationRef = Arc<dyn Operation>;

/// Trait for scheduled operations.
///
/// Only `id` and `execute` are required. The defaults describe an operation
/// that is undoable, owns no contexts, declares no children and needs no
/// resource; `undo` and `redo` then succeed without doing anything.
#[async_trait]
pub trait Operation: Send + Sync + Debug {
    /// Returns the operation id. Must be stable for the lifetime of a run.
    fn id(&self) -> &str;

    /// Executes the operation.
    ///
    /// An `Err` is never propagated by the scheduler: it is converted into a
    /// fatal status, exactly like a panic.
    async fn execute(&self, monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus>;

    /// Reverses the effects of `execute`.
    async fn undo(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        Ok(OperationStatus::ok())
    }

    /// Re-applies the effects of `execute` after an undo.
    async fn redo(&self, monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.execute(monitor).await
    }

    /// Whether `undo` may be called.
    fn can_undo(&self) -> bool {
        true
    }

    /// Whether `redo` may be called.
    fn can_redo(&self) -> bool {
        self.can_undo()
    }

    /// Context ids this operation registers when it executes.
    fn owned_context_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// Operations that must run immediately before this one.
    ///
    /// Queried at most once per occurrence, after every pre-extension of this
    /// occurrence has executed.
    fn pre_operations(&self) -> Vec<OperationRef> {
        Vec::new()
    }

    /// Operations that must run immediately after this one.
    fn post_operations(&self) -> Vec<OperationRef> {
        Vec::new()
    }

    /// Resource to hold exclusively while executing or undoing.
    fn mutex_resource(&self) -> Option<ResourceToken> {
        None
    }
}

/// An operation that does nothing. Used as the root when none is supplied.
#[derive(Debug, Clone)]
pub struct NullOperation {
    id: String,
}

impl NullOperation {
    /// Creates a new no-op operation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Operation for NullOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        Ok(OperationStatus::ok())
    }
}

type OperationFn = dyn Fn(&ProgressMonitor) -> anyhow::Result<OperationStatus> + Send + Sync;

/// A closure-based operation.
pub struct FnOperation {
    id: String,
    execute: Box<OperationFn>,
    undo: Option<Box<OperationFn>>,
    resource: Option<ResourceToken>,
    contexts: Vec<String>,
}

impl FnOperation {
    /// Creates a new closure-based operation. It is not undoable until an
    /// undo closure is attached.
    pub fn new<F>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(&ProgressMonitor) -> anyhow::Result<OperationStatus> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            execute: Box::new(execute),
            undo: None,
            resource: None,
            contexts: Vec::new(),
        }
    }

    /// Attaches an undo closure.
    #[must_use]
    pub fn with_undo<F>(mut self, undo: F) -> Self
    where
        F: Fn(&ProgressMonitor) -> anyhow::Result<OperationStatus> + Send + Sync + 'static,
    {
        self.undo = Some(Box::new(undo));
        self
    }

    /// Declares the resource to hold while running.
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceToken) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Declares an owned context id.
    #[must_use]
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.contexts.push(context_id.into());
        self
    }
}

impl Debug for FnOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperation")
            .field("id", &self.id)
            .field("undoable", &self.undo.is_some())
            .finish()
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        (self.execute)(monitor)
    }

    async fn undo(&self, monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        match &self.undo {
            Some(undo) => undo(monitor),
            None => Ok(OperationStatus::ok()),
        }
    }

    fn can_undo(&self) -> bool {
        self.undo.is_some()
    }

    fn owned_context_ids(&self) -> Vec<String> {
        self.contexts.clone()
    }

    fn mutex_resource(&self) -> Option<ResourceToken> {
        self.resource.clone()
    }
}
