//! Progress reporting handed to operations.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Progress monitor passed to every execute, undo and redo call.
///
/// Operations report how much work they have done; the scheduler logs it at
/// debug level and exposes it for inspection.
#[derive(Debug, Default)]
pub struct ProgressMonitor {
    operation_id: String,
    task: RwLock<Option<String>>,
    subtask: RwLock<Option<String>>,
    total: AtomicU64,
    worked: AtomicU64,
}

impl ProgressMonitor {
    /// Creates a monitor for one operation.
    #[must_use]
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            ..Self::default()
        }
    }

    /// Returns the id of the operation being monitored.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Starts a task with a known amount of work units.
    pub fn begin_task(&self, name: impl Into<String>, total_work: u64) {
        let name = name.into();
        debug!(
            operation_id = %self.operation_id,
            task = %name,
            total_work,
            "Task started"
        );
        *self.task.write() = Some(name);
        self.total.store(total_work, Ordering::SeqCst);
        self.worked.store(0, Ordering::SeqCst);
    }

    /// Names the current subtask.
    pub fn subtask(&self, name: impl Into<String>) {
        *self.subtask.write() = Some(name.into());
    }

    /// Records completed work units.
    pub fn worked(&self, units: u64) {
        let worked = self.worked.fetch_add(units, Ordering::SeqCst) + units;
        debug!(
            operation_id = %self.operation_id,
            worked,
            total = self.total.load(Ordering::SeqCst),
            "Progress"
        );
    }

    /// Marks the task as done.
    pub fn done(&self) {
        let total = self.total.load(Ordering::SeqCst);
        self.worked.fetch_max(total, Ordering::SeqCst);
        *self.subtask.write() = None;
    }

    /// Returns the current task name.
    #[must_use]
    pub fn task(&self) -> Option<String> {
        self.task.read().clone()
    }

    /// Returns the current subtask name.
    #[must_use]
    pub fn current_subtask(&self) -> Option<String> {
        self.subtask.read().clone()
    }

    /// Returns completed work units.
    #[must_use]
    pub fn worked_units(&self) -> u64 {
        self.worked.load(Ordering::SeqCst)
    }

    /// Returns the fraction of work done, or `None` when no total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return None;
        }
        Some((self.worked_units() as f64 / total as f64).min(1.0))
    }
}
