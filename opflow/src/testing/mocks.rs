//! Mock operations and listeners for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{OperationStatus, Severity};
use crate::operations::{Operation, OperationRef, ProgressMonitor};
use crate::resources::ResourceToken;
use crate::scheduler::{Flow, OperationListener};

/// Shared, ordered log of what mock operations did.
///
/// Entries look like `execute:a`, `undo:a`, `redo:a`, `fetch_pre:a` and
/// `fetch_post:a`. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns every entry, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the ids recorded under `kind`, in order.
    #[must_use]
    pub fn ids(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        self.entries
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Ids executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.ids("execute")
    }

    /// Ids undone, in order.
    #[must_use]
    pub fn undone(&self) -> Vec<String> {
        self.ids("undo")
    }

    /// Ids redone, in order.
    #[must_use]
    pub fn redone(&self) -> Vec<String> {
        self.ids("redo")
    }

    /// Clears the journal.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// An operation that records every call in a [`Journal`].
#[derive(Debug)]
pub struct RecordingOperation {
    id: String,
    journal: Journal,
    status: OperationStatus,
    undoable: bool,
    pre: Vec<OperationRef>,
    post: Vec<OperationRef>,
    contexts: Vec<String>,
    resource: Option<ResourceToken>,
}

impl RecordingOperation {
    /// Creates an undoable operation returning OK.
    #[must_use]
    pub fn new(id: impl Into<String>, journal: &Journal) -> Self {
        Self {
            id: id.into(),
            journal: journal.clone(),
            status: OperationStatus::ok(),
            undoable: true,
            pre: Vec::new(),
            post: Vec::new(),
            contexts: Vec::new(),
            resource: None,
        }
    }

    /// Sets the status `execute` returns.
    #[must_use]
    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    /// Marks the operation as not undoable.
    #[must_use]
    pub fn not_undoable(mut self) -> Self {
        self.undoable = false;
        self
    }

    /// Declares dynamic pre-children.
    #[must_use]
    pub fn with_pre_operations(mut self, operations: Vec<OperationRef>) -> Self {
        self.pre = operations;
        self
    }

    /// Declares dynamic post-children.
    #[must_use]
    pub fn with_post_operations(mut self, operations: Vec<OperationRef>) -> Self {
        self.post = operations;
        self
    }

    /// Declares an owned context id.
    #[must_use]
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.contexts.push(context_id.into());
        self
    }

    /// Declares the resource to hold while running.
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceToken) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Wraps the operation in an [`OperationRef`].
    #[must_use]
    pub fn shared(self) -> OperationRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Operation for RecordingOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        monitor.begin_task(&self.id, 1);
        self.journal.record(format!("execute:{}", self.id));
        monitor.worked(1);
        monitor.done();
        Ok(self.status.clone())
    }

    async fn undo(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("undo:{}", self.id));
        Ok(OperationStatus::ok())
    }

    async fn redo(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("redo:{}", self.id));
        Ok(OperationStatus::ok())
    }

    fn can_undo(&self) -> bool {
        self.undoable
    }

    fn owned_context_ids(&self) -> Vec<String> {
        self.contexts.clone()
    }

    fn pre_operations(&self) -> Vec<OperationRef> {
        self.journal.record(format!("fetch_pre:{}", self.id));
        self.pre.clone()
    }

    fn post_operations(&self) -> Vec<OperationRef> {
        self.journal.record(format!("fetch_post:{}", self.id));
        self.post.clone()
    }

    fn mutex_resource(&self) -> Option<ResourceToken> {
        self.resource.clone()
    }
}

/// An operation that fails when executed.
#[derive(Debug)]
pub struct FailingOperation {
    id: String,
    journal: Journal,
    severity: Severity,
    raises: bool,
}

impl FailingOperation {
    /// Creates an operation whose `execute` returns a status of `severity`.
    #[must_use]
    pub fn new(id: impl Into<String>, journal: &Journal, severity: Severity) -> Self {
        Self {
            id: id.into(),
            journal: journal.clone(),
            severity,
            raises: false,
        }
    }

    /// Creates an operation returning a fatal status.
    #[must_use]
    pub fn fatal(id: impl Into<String>, journal: &Journal) -> Self {
        Self::new(id, journal, Severity::Fatal)
    }

    /// Creates an operation whose `execute` returns `Err`.
    #[must_use]
    pub fn raising(id: impl Into<String>, journal: &Journal) -> Self {
        Self {
            raises: true,
            ..Self::fatal(id, journal)
        }
    }
}

#[async_trait]
impl Operation for FailingOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("execute:{}", self.id));
        if self.raises {
            anyhow::bail!("{} raised", self.id);
        }
        Ok(OperationStatus::new(self.severity, format!("{} failed", self.id)))
    }

    async fn undo(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("undo:{}", self.id));
        Ok(OperationStatus::ok())
    }
}

/// An operation that panics when executed.
#[derive(Debug)]
pub struct PanickingOperation {
    id: String,
    journal: Journal,
}

impl PanickingOperation {
    /// Creates a new panicking operation.
    #[must_use]
    pub fn new(id: impl Into<String>, journal: &Journal) -> Self {
        Self {
            id: id.into(),
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl Operation for PanickingOperation {
    fn id(&self) -> &str {
        &self.id
    }

    #[allow(clippy::panic)]
    async fn execute(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("execute:{}", self.id));
        panic!("{} panicked", self.id);
    }

    async fn undo(&self, _monitor: &ProgressMonitor) -> anyhow::Result<OperationStatus> {
        self.journal.record(format!("undo:{}", self.id));
        Ok(OperationStatus::ok())
    }
}

#[derive(Debug, Default)]
struct Script {
    stop_once: HashSet<String>,
    stop_always: HashSet<String>,
    panic_at: HashSet<String>,
    notified: Vec<String>,
}

/// A listener with scripted answers that records every notification.
///
/// Clones share state, so a test can keep one handle and give another to
/// the manager.
#[derive(Debug, Clone, Default)]
pub struct ScriptedListener {
    script: Arc<Mutex<Script>>,
}

impl ScriptedListener {
    /// Creates a listener that always continues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the first time `operation_id` is seen.
    #[must_use]
    pub fn stop_once_at(self, operation_id: impl Into<String>) -> Self {
        self.script.lock().stop_once.insert(operation_id.into());
        self
    }

    /// Stops every time `operation_id` is seen.
    #[must_use]
    pub fn stop_always_at(self, operation_id: impl Into<String>) -> Self {
        self.script.lock().stop_always.insert(operation_id.into());
        self
    }

    /// Panics when `operation_id` is seen.
    #[must_use]
    pub fn panic_at(self, operation_id: impl Into<String>) -> Self {
        self.script.lock().panic_at.insert(operation_id.into());
        self
    }

    /// Ids notified so far, in order.
    #[must_use]
    pub fn notified(&self) -> Vec<String> {
        self.script.lock().notified.clone()
    }
}

impl OperationListener for ScriptedListener {
    #[allow(clippy::panic)]
    fn notify(&self, operation: &dyn Operation) -> Flow {
        let id = operation.id();
        let should_panic = {
            let mut script = self.script.lock();
            script.notified.push(id.to_string());
            if script.panic_at.contains(id) {
                true
            } else if script.stop_always.contains(id) || script.stop_once.remove(id) {
                return Flow::Stop;
            } else {
                false
            }
        };
        if should_panic {
            panic!("listener panicked at {id}");
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_filters_by_kind() {
        let journal = Journal::new();
        journal.record("execute:a");
        journal.record("undo:a");
        journal.record("execute:b");

        assert_eq!(journal.executed(), vec!["a", "b"]);
        assert_eq!(journal.undone(), vec!["a"]);
        assert!(journal.redone().is_empty());

        journal.clear();
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_recording_operation() {
        let journal = Journal::new();
        let op = RecordingOperation::new("a", &journal).with_context("ctx");

        let monitor = ProgressMonitor::new("a");
        op.execute(&monitor).await.unwrap();
        op.undo(&monitor).await.unwrap();
        let _ = op.pre_operations();

        assert_eq!(journal.entries(), vec!["execute:a", "undo:a", "fetch_pre:a"]);
        assert_eq!(monitor.fraction(), Some(1.0));
        assert_eq!(op.owned_context_ids(), vec!["ctx".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_operation() {
        let journal = Journal::new();
        let status = FailingOperation::new("e", &journal, Severity::Error)
            .execute(&ProgressMonitor::new("e"))
            .await
            .unwrap();
        assert_eq!(status.severity, Severity::Error);

        let raised = FailingOperation::raising("r", &journal)
            .execute(&ProgressMonitor::new("r"))
            .await;
        assert!(raised.is_err());
        assert_eq!(journal.executed(), vec!["e", "r"]);
    }

    #[test]
    fn test_scripted_listener() {
        let journal = Journal::new();
        let a = RecordingOperation::new("a", &journal);
        let listener = ScriptedListener::new().stop_once_at("a");
        let handle = listener.clone();

        assert_eq!(listener.notify(&a), Flow::Stop);
        assert_eq!(listener.notify(&a), Flow::Continue);
        assert_eq!(handle.notified(), vec!["a", "a"]);
    }
}
