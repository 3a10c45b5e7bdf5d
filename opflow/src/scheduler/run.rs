//! Runs, run history and sweep reports.

use super::traversal::TraversalNode;
use crate::core::{OperationStatus, OverallStatus};
use crate::extensions::EntryId;
use crate::observability::StepPhase;
use crate::operations::OperationRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An operation executed during a run, with its result.
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    /// Table entry the operation ran as.
    pub entry: EntryId,
    /// The operation.
    pub operation: OperationRef,
    /// Result of `execute`.
    pub status: OperationStatus,
}

/// The work done by one scheduler invocation.
///
/// The stack is where traversal continues; the executed list is append-only
/// and is what undo walks in reverse.
#[derive(Debug, Clone)]
pub struct Run {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    pub(crate) stack: Vec<TraversalNode>,
    executed: Vec<ExecutedStep>,
    status: OverallStatus,
}

impl Run {
    /// Creates a run resuming from `stack`.
    #[must_use]
    pub fn new(stack: Vec<TraversalNode>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stack,
            executed: Vec::new(),
            status: OverallStatus::new(),
        }
    }

    /// Unique run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Pending traversal nodes, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[TraversalNode] {
        &self.stack
    }

    /// Operations executed so far, in execution order.
    #[must_use]
    pub fn executed(&self) -> &[ExecutedStep] {
        &self.executed
    }

    /// Ids of the executed operations.
    #[must_use]
    pub fn executed_ids(&self) -> Vec<String> {
        self.executed
            .iter()
            .map(|step| step.operation.id().to_string())
            .collect()
    }

    /// True once the traversal stack is empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty()
    }

    /// Merged status of the invocation that produced this run.
    #[must_use]
    pub fn status(&self) -> &OverallStatus {
        &self.status
    }

    pub(crate) fn record(&mut self, step: ExecutedStep) {
        self.executed.push(step);
    }

    pub(crate) fn set_status(&mut self, status: OverallStatus) {
        self.status = status;
    }
}

/// Stack of runs, most recent last, plus the runs undone and available for
/// redo.
#[derive(Debug, Default)]
pub struct RunHistory {
    runs: Vec<Run>,
    undone: Vec<Run>,
}

impl RunHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs still applied, oldest first.
    #[must_use]
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// The most recent run.
    #[must_use]
    pub fn current(&self) -> Option<&Run> {
        self.runs.last()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Run> {
        self.runs.last_mut()
    }

    /// Number of applied runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True when no run is applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Statuses of the applied runs merged in order.
    #[must_use]
    pub fn status(&self) -> OverallStatus {
        let mut merged = OverallStatus::new();
        for run in &self.runs {
            merged.absorb(&run.status);
        }
        merged
    }

    /// Number of runs available for redo.
    #[must_use]
    pub fn undone_len(&self) -> usize {
        self.undone.len()
    }

    /// Starts a new run and clears the redo stack.
    ///
    /// The new run resumes from a clone of the current run's stack, or
    /// starts over at `root` when there is nothing left to resume.
    pub(crate) fn begin(&mut self, root: EntryId) -> &mut Run {
        let stack = match self.runs.last() {
            Some(current) if !current.stack.is_empty() => current.stack.clone(),
            _ => vec![TraversalNode::new(root)],
        };
        self.undone.clear();
        self.runs.push(Run::new(stack));
        let last = self.runs.len() - 1;
        &mut self.runs[last]
    }

    pub(crate) fn pop(&mut self) -> Option<Run> {
        self.runs.pop()
    }

    pub(crate) fn push_undone(&mut self, run: Run) {
        self.undone.push(run);
    }

    pub(crate) fn pop_undone(&mut self) -> Option<Run> {
        self.undone.pop()
    }

    pub(crate) fn restore(&mut self, run: Run) {
        self.runs.push(run);
    }
}

/// Result of undoing or redoing one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    /// The run swept.
    pub run_id: Uuid,
    /// Whether this was an undo or a redo.
    pub phase: StepPhase,
    /// Operations undone or redone, in sweep order.
    pub applied: Vec<String>,
    /// Operations skipped because they cannot be undone or redone.
    pub skipped: Vec<String>,
    /// Merged status of the sweep.
    pub status: OverallStatus,
}

impl SweepReport {
    pub(crate) fn new(run_id: Uuid, phase: StepPhase) -> Self {
        Self {
            run_id,
            phase,
            applied: Vec::new(),
            skipped: Vec::new(),
            status: OverallStatus::new(),
        }
    }
}

/// Report of an undo sweep.
pub type UndoReport = SweepReport;

/// Report of a redo sweep.
pub type RedoReport = SweepReport;

/// How an invocation of `run_operations` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// The traversal stack emptied.
    Completed,
    /// Traversal stopped with work left; the next invocation resumes it.
    Suspended,
    /// The run halted and was undone automatically.
    RolledBack,
}

/// Result of one `run_operations` invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run pushed by this invocation.
    pub run_id: Uuid,
    /// How the invocation ended.
    pub state: RunState,
    /// Merged status of every step executed.
    pub status: OverallStatus,
    /// Undo sweeps performed by automatic rollback, newest run first.
    pub undo: Vec<UndoReport>,
}

impl RunOutcome {
    /// True when the traversal finished without rollback.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// True when automatic rollback ran.
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        self.state == RunState::RolledBack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{ExtensionCatalog, ExtensionTable};
    use crate::operations::NullOperation;
    use std::sync::Arc;

    fn table() -> ExtensionTable {
        ExtensionTable::build(Arc::new(NullOperation::new("root")), ExtensionCatalog::new()).unwrap()
    }

    #[test]
    fn test_begin_starts_at_root() {
        let table = table();
        let mut history = RunHistory::new();

        let run = history.begin(table.root());
        assert_eq!(run.stack().len(), 1);
        assert_eq!(run.stack()[0].entry(), table.root());
        assert!(run.executed().is_empty());
    }

    #[test]
    fn test_begin_resumes_pending_stack() {
        let table = table();
        let mut history = RunHistory::new();

        let first = history.begin(table.root());
        first.stack[0].set_pre_children(Vec::new());
        let first_id = first.run_id();

        let second = history.begin(table.root());
        assert_ne!(second.run_id(), first_id);
        assert!(second.stack()[0].pre_children_fetched());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_begin_after_completion_starts_over() {
        let table = table();
        let mut history = RunHistory::new();

        history.begin(table.root()).stack.clear();
        let run = history.begin(table.root());
        assert!(!run.stack()[0].pre_children_fetched());
    }

    #[test]
    fn test_status_merges_runs_in_order() {
        let table = table();
        let mut history = RunHistory::new();

        let mut first = OverallStatus::new();
        first.merge(OperationStatus::ok().with_operation_id("a"));
        history.begin(table.root()).set_status(first);

        let mut second = OverallStatus::new();
        second.merge(OperationStatus::warning("slow").with_operation_id("b"));
        second.merge(OperationStatus::ok().with_operation_id("c"));
        history.begin(table.root()).set_status(second);

        let merged = history.status();
        assert_eq!(merged.step_results().len(), 3);
        assert_eq!(merged.primary().unwrap().operation_id.as_deref(), Some("b"));
        assert_eq!(merged.children().len(), 1);

        history.pop();
        assert!(history.status().is_ok());
    }

    #[test]
    fn test_begin_clears_redo_stack() {
        let table = table();
        let mut history = RunHistory::new();
        history.begin(table.root());

        let run = history.pop().unwrap();
        history.push_undone(run);
        assert_eq!(history.undone_len(), 1);

        history.begin(table.root());
        assert_eq!(history.undone_len(), 0);
    }
}
