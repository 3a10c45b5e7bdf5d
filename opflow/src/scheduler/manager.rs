//! The operation manager.
//!
//! Walks the extension tree depth-first with an explicit stack, records
//! every executed operation in the current run, and undoes runs in exact
//! reverse order.

use super::config::{RollbackScope, SchedulerConfig};
use super::listeners::{Flow, OperationListener};
use super::run::{ExecutedStep, RedoReport, Run, RunHistory, RunOutcome, RunState, SweepReport, UndoReport};
use super::traversal::{NodeAction, TraversalNode};
use crate::context::{ContextManager, NoOpContextManager};
use crate::core::{OperationStatus, OverallStatus, Severity};
use crate::errors::{panic_message, OpflowError, StepFailure};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::extensions::{EntryId, ExtensionCatalog, ExtensionPosition, ExtensionTable};
use crate::observability::{OperationSpanAttributes, SpanTimer, StepPhase};
use crate::operations::{NullOperation, Operation, OperationRef, ProgressMonitor};
use crate::resources::ResourceLocks;
use futures::FutureExt;
use serde_json::json;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a traversal loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traversal {
    Completed,
    Suspended,
    Halted,
}

/// Builder for [`OperationManager`].
#[derive(Default)]
pub struct OperationManagerBuilder {
    root: Option<OperationRef>,
    catalog: ExtensionCatalog,
    context_manager: Option<Arc<dyn ContextManager>>,
    resources: Option<Arc<ResourceLocks>>,
    event_sink: Option<Arc<dyn EventSink>>,
    pre_listener: Option<Arc<dyn OperationListener>>,
    post_listener: Option<Arc<dyn OperationListener>>,
    undo_listener: Option<Arc<dyn OperationListener>>,
    config: SchedulerConfig,
}

impl OperationManagerBuilder {
    /// Creates a builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root operation. Without one a no-op placeholder is used.
    #[must_use]
    pub fn with_root(mut self, root: OperationRef) -> Self {
        self.root = Some(root);
        self
    }

    /// Sets the catalog of declared extensions.
    #[must_use]
    pub fn with_catalog(mut self, catalog: ExtensionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the context manager notified about owned contexts.
    #[must_use]
    pub fn with_context_manager(mut self, manager: Arc<dyn ContextManager>) -> Self {
        self.context_manager = Some(manager);
        self
    }

    /// Shares a resource lock table with other subsystems.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<ResourceLocks>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Sets the listener consulted before each operation executes.
    #[must_use]
    pub fn with_pre_execute_listener(mut self, listener: impl OperationListener + 'static) -> Self {
        self.pre_listener = Some(Arc::new(listener));
        self
    }

    /// Sets the listener consulted after each operation executes.
    #[must_use]
    pub fn with_post_execute_listener(mut self, listener: impl OperationListener + 'static) -> Self {
        self.post_listener = Some(Arc::new(listener));
        self
    }

    /// Sets the listener notified before each operation is undone.
    #[must_use]
    pub fn with_undo_listener(mut self, listener: impl OperationListener + 'static) -> Self {
        self.undo_listener = Some(Arc::new(listener));
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the manager and its extension table.
    ///
    /// # Errors
    ///
    /// Returns a config error for an invalid configuration, or
    /// `CycleDetected` if the catalog makes an operation its own ancestor.
    pub fn build(self) -> Result<OperationManager, OpflowError> {
        self.config.validate()?;

        let root = self.root.unwrap_or_else(|| {
            Arc::new(NullOperation::new(self.config.root_operation_id.clone())) as OperationRef
        });
        let table = ExtensionTable::build(root, self.catalog)?;
        debug!(entries = table.len(), "Operation manager built");

        Ok(OperationManager {
            table,
            history: RunHistory::new(),
            contexts: self
                .context_manager
                .unwrap_or_else(|| Arc::new(NoOpContextManager)),
            resources: self.resources.unwrap_or_else(ResourceLocks::new),
            events: self.event_sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            pre_listener: self.pre_listener,
            post_listener: self.post_listener,
            undo_listener: self.undo_listener,
            config: self.config,
        })
    }
}

/// Schedules a tree of operations and their extensions.
///
/// Every call to [`run_operations`](Self::run_operations) pushes a new run
/// onto the history. Traversal resumes where the previous run stopped, so a
/// listener returning [`Flow::Stop`] suspends work without losing progress.
pub struct OperationManager {
    table: ExtensionTable,
    history: RunHistory,
    contexts: Arc<dyn ContextManager>,
    resources: Arc<ResourceLocks>,
    events: Arc<dyn EventSink>,
    pre_listener: Option<Arc<dyn OperationListener>>,
    post_listener: Option<Arc<dyn OperationListener>>,
    undo_listener: Option<Arc<dyn OperationListener>>,
    config: SchedulerConfig,
}

impl fmt::Debug for OperationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationManager")
            .field("root", &self.table.operation(self.table.root()).id())
            .field("entries", &self.table.len())
            .field("runs", &self.history.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OperationManager {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> OperationManagerBuilder {
        OperationManagerBuilder::new()
    }

    /// Creates a manager for `root` with the given catalog and defaults for
    /// everything else.
    ///
    /// # Errors
    ///
    /// Same as [`OperationManagerBuilder::build`].
    pub fn new(root: OperationRef, catalog: ExtensionCatalog) -> Result<Self, OpflowError> {
        Self::builder().with_root(root).with_catalog(catalog).build()
    }

    /// The extension table.
    #[must_use]
    pub fn table(&self) -> &ExtensionTable {
        &self.table
    }

    /// The run history.
    #[must_use]
    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The resource lock table.
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceLocks> {
        &self.resources
    }

    /// Ids of every operation executed by the applied runs, in order.
    #[must_use]
    pub fn executed_operation_ids(&self) -> Vec<String> {
        self.history.runs().iter().flat_map(Run::executed_ids).collect()
    }

    /// Merged status of every applied run, oldest first.
    ///
    /// Equal to the status a single uninterrupted invocation would have
    /// produced for the same steps.
    #[must_use]
    pub fn overall_status(&self) -> OverallStatus {
        self.history.status()
    }

    /// True when the most recent run finished its traversal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.history.current().is_some_and(Run::is_complete)
    }

    /// Registers `operation` to run immediately before `target_id`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTarget` or `CycleDetected`; the table is unchanged on
    /// error.
    pub fn register_pre_extension(
        &mut self,
        target_id: &str,
        operation: OperationRef,
    ) -> Result<EntryId, OpflowError> {
        self.table
            .register_extension(target_id, ExtensionPosition::Pre, operation)
    }

    /// Registers `operation` to run immediately after `target_id`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register_pre_extension`].
    pub fn register_post_extension(
        &mut self,
        target_id: &str,
        operation: OperationRef,
    ) -> Result<EntryId, OpflowError> {
        self.table
            .register_extension(target_id, ExtensionPosition::Post, operation)
    }

    /// Runs operations until traversal completes, a listener stops it, or a
    /// step reaches the halt severity.
    ///
    /// Step failures never escape: they are merged into the returned status.
    /// A halted run is undone automatically unless `auto_undo` is disabled.
    pub async fn run_operations(&mut self) -> RunOutcome {
        let root = self.table.root();
        let run_id = self.history.begin(root).run_id();
        info!(run_id = %run_id, runs = self.history.len(), "Run started");
        self.emit(names::RUN_STARTED, json!({ "run_id": run_id })).await;

        let mut overall = OverallStatus::new();
        let traversal = self.traverse(run_id, &mut overall).await;
        if let Some(run) = self.history.current_mut() {
            run.set_status(overall.clone());
        }

        let (state, undo) = match traversal {
            Traversal::Completed => {
                info!(run_id = %run_id, severity = %overall.severity(), "Run completed");
                self.emit(
                    names::RUN_COMPLETED,
                    json!({ "run_id": run_id, "severity": overall.severity() }),
                )
                .await;
                (RunState::Completed, Vec::new())
            }
            Traversal::Halted if self.config.auto_undo => {
                warn!(
                    run_id = %run_id,
                    severity = %overall.severity(),
                    scope = ?self.config.rollback_scope,
                    "Run halted, rolling back"
                );
                let undo = match self.config.rollback_scope {
                    RollbackScope::LastRun => self.undo_last_run().await.into_iter().collect(),
                    RollbackScope::AllRuns => self.undo_all_runs().await,
                };
                (RunState::RolledBack, undo)
            }
            Traversal::Suspended | Traversal::Halted => {
                info!(run_id = %run_id, severity = %overall.severity(), "Run suspended");
                self.emit(
                    names::RUN_SUSPENDED,
                    json!({ "run_id": run_id, "severity": overall.severity() }),
                )
                .await;
                (RunState::Suspended, Vec::new())
            }
        };

        RunOutcome {
            run_id,
            state,
            status: overall,
            undo,
        }
    }

    /// Undoes the most recent run, walking its executed operations in
    /// reverse. Returns `None` when the history is empty.
    ///
    /// The undone run becomes available to [`Self::redo_last_undone`].
    pub async fn undo_last_run(&mut self) -> Option<UndoReport> {
        let run = self.history.pop()?;
        let report = self.undo_run(&run).await;
        self.history.push_undone(run);
        Some(report)
    }

    /// Undoes every run in the history, newest first.
    pub async fn undo_all_runs(&mut self) -> Vec<UndoReport> {
        let mut reports = Vec::with_capacity(self.history.len());
        while let Some(report) = self.undo_last_run().await {
            reports.push(report);
        }
        reports
    }

    /// Re-applies the most recently undone run in forward order and puts it
    /// back on the history. Returns `None` when nothing was undone since the
    /// last run.
    pub async fn redo_last_undone(&mut self) -> Option<RedoReport> {
        let run = self.history.pop_undone()?;
        let run_id = run.run_id();
        info!(run_id = %run_id, steps = run.executed().len(), "Redoing run");

        let mut report = SweepReport::new(run_id, StepPhase::Redo);
        for step in run.executed() {
            let operation = &step.operation;
            if !operation.can_redo() {
                info!(run_id = %run_id, operation_id = operation.id(), "Operation cannot be redone, skipping");
                report.skipped.push(operation.id().to_string());
                continue;
            }

            for context_id in operation.owned_context_ids() {
                self.contexts.register(&context_id);
            }
            let (status, attrs) = self.invoke(operation, StepPhase::Redo, run_id).await;
            if status.severity >= Severity::Error {
                warn!(run_id = %run_id, operation_id = operation.id(), message = %status.message, "Redo step failed");
            }
            self.emit(names::OPERATION_REDONE, attrs.to_json()).await;
            report.applied.push(operation.id().to_string());
            report.status.merge(status);
        }

        self.history.restore(run);
        Some(report)
    }

    async fn traverse(&mut self, run_id: Uuid, overall: &mut OverallStatus) -> Traversal {
        loop {
            let Some(run) = self.history.current_mut() else {
                return Traversal::Completed;
            };
            let Some(node) = run.stack.last_mut() else {
                return Traversal::Completed;
            };
            let entry = node.entry();
            let action = node.next_action(self.table.entry(entry));

            match action {
                NodeAction::Push(child) => {
                    debug!(
                        run_id = %run_id,
                        parent = self.table.operation(entry).id(),
                        operation_id = self.table.operation(child).id(),
                        depth = run.stack.len(),
                        "Descending"
                    );
                    run.stack.push(TraversalNode::new(child));
                }
                NodeAction::Pop => {
                    run.stack.pop();
                }
                NodeAction::FetchPreChildren | NodeAction::FetchPostChildren => {
                    let position = if action == NodeAction::FetchPreChildren {
                        ExtensionPosition::Pre
                    } else {
                        ExtensionPosition::Post
                    };
                    let operation = Arc::clone(self.table.operation(entry));
                    let requested = match position {
                        ExtensionPosition::Pre => operation.pre_operations(),
                        ExtensionPosition::Post => operation.post_operations(),
                    };
                    let (children, failure) =
                        register_children(&mut self.table, entry, position, requested);

                    if let Some(node) = self.history.current_mut().and_then(|r| r.stack.last_mut()) {
                        match position {
                            ExtensionPosition::Pre => node.set_pre_children(children),
                            ExtensionPosition::Post => node.set_post_children(children),
                        }
                    }

                    if let Some(status) = failure {
                        overall.merge(status);
                        if overall.reached(self.config.halt_severity) {
                            return Traversal::Halted;
                        }
                    }
                }
                NodeAction::Execute => {
                    let operation = Arc::clone(self.table.operation(entry));
                    if let ControlFlow::Break(end) =
                        self.execute_node(run_id, entry, &operation, overall).await
                    {
                        return end;
                    }
                }
            }
        }
    }

    async fn execute_node(
        &mut self,
        run_id: Uuid,
        entry: EntryId,
        operation: &OperationRef,
        overall: &mut OverallStatus,
    ) -> ControlFlow<Traversal> {
        let operation_id = operation.id();

        if consult(self.pre_listener.as_ref(), operation) == Flow::Stop {
            info!(run_id = %run_id, operation_id, "Traversal stopped before execution");
            self.emit_vetoed(run_id, operation_id, "pre_execute").await;
            return ControlFlow::Break(Traversal::Suspended);
        }

        let contexts = operation.owned_context_ids();
        for context_id in &contexts {
            self.contexts.register(context_id);
        }

        self.emit(
            names::OPERATION_STARTED,
            json!({ "run_id": run_id, "operation_id": operation_id }),
        )
        .await;

        let (status, attrs) = self.invoke(operation, StepPhase::Execute, run_id).await;
        let event = if status.severity >= Severity::Error {
            names::OPERATION_FAILED
        } else {
            names::OPERATION_COMPLETED
        };
        self.emit(event, attrs.to_json()).await;

        // A step that never got its resource did not run and has nothing to undo.
        let attempted = !matches!(status.failure, Some(StepFailure::ResourceUnavailable { .. }));
        if !attempted {
            for context_id in &contexts {
                self.contexts.unregister(context_id);
            }
        }
        if let Some(run) = self.history.current_mut().filter(|_| attempted) {
            run.record(ExecutedStep {
                entry,
                operation: Arc::clone(operation),
                status: status.clone(),
            });
            if let Some(node) = run.stack.last_mut() {
                node.mark_executed();
            }
        }

        overall.merge(status);
        if overall.reached(self.config.halt_severity) {
            return ControlFlow::Break(Traversal::Halted);
        }

        if consult(self.post_listener.as_ref(), operation) == Flow::Stop {
            info!(run_id = %run_id, operation_id, "Traversal stopped after execution");
            self.emit_vetoed(run_id, operation_id, "post_execute").await;
            return ControlFlow::Break(Traversal::Suspended);
        }

        ControlFlow::Continue(())
    }

    async fn undo_run(&self, run: &Run) -> UndoReport {
        let run_id = run.run_id();
        info!(run_id = %run_id, steps = run.executed().len(), "Undoing run");

        let mut report = SweepReport::new(run_id, StepPhase::Undo);
        for step in run.executed().iter().rev() {
            let operation = &step.operation;
            let operation_id = operation.id();

            for context_id in operation.owned_context_ids() {
                self.contexts.unregister(&context_id);
            }
            self.notify_undo_listener(operation.as_ref());

            if !operation.can_undo() {
                let skipped = StepFailure::UndoPartial {
                    operation_id: operation_id.to_string(),
                };
                info!(run_id = %run_id, operation_id, "{skipped}, skipping");
                self.emit(
                    names::OPERATION_UNDO_SKIPPED,
                    json!({ "run_id": run_id, "operation_id": operation_id }),
                )
                .await;
                report.skipped.push(operation_id.to_string());
                continue;
            }

            let (status, attrs) = self.invoke(operation, StepPhase::Undo, run_id).await;
            if status.severity >= Severity::Error {
                warn!(run_id = %run_id, operation_id, message = %status.message, "Undo step failed");
            }
            self.emit(names::OPERATION_UNDONE, attrs.to_json()).await;
            report.applied.push(operation_id.to_string());
            report.status.merge(status);
        }

        self.emit(
            names::RUN_ROLLED_BACK,
            json!({
                "run_id": run_id,
                "undone": report.applied,
                "skipped": report.skipped,
            }),
        )
        .await;
        report
    }

    /// Runs one entry point of `operation` inside its resource scope.
    ///
    /// Never fails: errors and panics become fatal statuses. The resource is
    /// released on every exit path.
    async fn invoke(
        &self,
        operation: &OperationRef,
        phase: StepPhase,
        run_id: Uuid,
    ) -> (OperationStatus, OperationSpanAttributes) {
        let operation_id = operation.id().to_string();
        let timer = SpanTimer::start(format!("{}:{operation_id}", phase.as_str()));
        let mut attrs = OperationSpanAttributes::new(&operation_id, run_id.to_string(), phase);

        let guard = match operation.mutex_resource() {
            Some(token) => {
                attrs = attrs.with_resource(token.to_string());
                match self
                    .resources
                    .acquire_within(&token, self.config.resource_acquire_timeout())
                    .await
                {
                    Ok(guard) => Some(guard),
                    Err(err) => {
                        warn!(
                            run_id = %run_id,
                            operation_id = %operation_id,
                            resource = %err.resource,
                            waited_ms = u64::try_from(err.waited.as_millis()).unwrap_or(u64::MAX),
                            "Resource unavailable"
                        );
                        let status = OperationStatus::from_failure(StepFailure::ResourceUnavailable {
                            operation_id,
                            resource: err.resource.to_string(),
                        });
                        let attrs = attrs
                            .with_severity(status.severity.to_string())
                            .with_duration_ms(timer.finish())
                            .with_message(&status.message);
                        return (status, attrs);
                    }
                }
            }
            None => None,
        };

        let monitor = ProgressMonitor::new(&operation_id);
        let call = match phase {
            StepPhase::Execute => operation.execute(&monitor),
            StepPhase::Undo => operation.undo(&monitor),
            StepPhase::Redo => operation.redo(&monitor),
        };
        let result = AssertUnwindSafe(call).catch_unwind().await;
        drop(guard);

        let status = match result {
            Ok(Ok(status)) => classify(status, &operation_id),
            Ok(Err(err)) => OperationStatus::from_failure(StepFailure::StepThrew {
                operation_id: operation_id.clone(),
                message: format!("{err:#}"),
            }),
            Err(payload) => OperationStatus::from_failure(StepFailure::StepThrew {
                operation_id: operation_id.clone(),
                message: panic_message(&*payload),
            }),
        };

        let duration_ms = timer.finish();
        debug!(
            run_id = %run_id,
            operation_id = %operation_id,
            phase = phase.as_str(),
            severity = %status.severity,
            duration_ms,
            "Step finished"
        );

        let attrs = attrs
            .with_severity(status.severity.to_string())
            .with_duration_ms(duration_ms)
            .with_message(&status.message);
        (status, attrs)
    }

    fn notify_undo_listener(&self, operation: &dyn Operation) {
        let Some(listener) = &self.undo_listener else {
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener.notify(operation)));
        if let Err(payload) = outcome {
            warn!(
                operation_id = operation.id(),
                panic = %panic_message(&*payload),
                "Undo listener panicked"
            );
        }
    }

    async fn emit_vetoed(&self, run_id: Uuid, operation_id: &str, hook: &str) {
        let failure = StepFailure::Vetoed {
            operation_id: operation_id.to_string(),
        };
        self.emit(
            names::OPERATION_VETOED,
            json!({ "run_id": run_id, "hook": hook, "failure": failure }),
        )
        .await;
    }

    async fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.events.emit(event_type, Some(data)).await;
    }
}

fn consult(listener: Option<&Arc<dyn OperationListener>>, operation: &OperationRef) -> Flow {
    listener.map_or(Flow::Continue, |l| l.notify(operation.as_ref()))
}

/// Attributes an operation's own status and classifies error results.
fn classify(status: OperationStatus, operation_id: &str) -> OperationStatus {
    let status = status.with_operation_id(operation_id);
    if status.severity >= Severity::Error && status.failure.is_none() {
        let failure = StepFailure::StepFailed {
            operation_id: operation_id.to_string(),
            message: status.message.clone(),
        };
        status.with_failure(failure)
    } else {
        status
    }
}

/// Registers dynamic children of `parent` in order.
///
/// Stops at the first child that would create a cycle and returns the
/// children registered so far together with a fatal status.
fn register_children(
    table: &mut ExtensionTable,
    parent: EntryId,
    position: ExtensionPosition,
    operations: Vec<OperationRef>,
) -> (Vec<EntryId>, Option<OperationStatus>) {
    let mut children = Vec::with_capacity(operations.len());
    for operation in operations {
        match table.register_child(parent, position, operation, &children) {
            Ok(child) => children.push(child),
            Err(err) => {
                let parent_id = table.operation(parent).id().to_string();
                warn!(operation_id = %parent_id, cycle = ?err.cycle_path, "Dynamic child rejected");
                let status = OperationStatus::fatal(err.to_string()).with_operation_id(parent_id);
                return (children, Some(status));
            }
        }
    }
    (children, None)
}
