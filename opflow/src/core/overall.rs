//! Merged status for one scheduler invocation.

use super::{OperationStatus, Severity};
use serde::{Deserialize, Serialize};

/// Accumulates the results of every step run during one invocation.
///
/// The first non-OK result becomes the primary result and every result
/// merged after it is appended as a child, whatever its severity. The
/// severity used for continuation decisions is the maximum seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallStatus {
    primary: Option<OperationStatus>,
    children: Vec<OperationStatus>,
    steps: Vec<OperationStatus>,
    severity: Severity,
}

impl OverallStatus {
    /// Creates an empty (OK) status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one step result.
    pub fn merge(&mut self, status: OperationStatus) {
        self.severity = self.severity.max(status.max_severity());
        self.steps.push(status.clone());

        if self.primary.is_some() {
            self.children.push(status);
        } else if !status.is_ok() {
            self.primary = Some(status);
        }
    }

    /// Merges every step result of `other`, in its merge order.
    pub fn absorb(&mut self, other: &Self) {
        for status in &other.steps {
            self.merge(status.clone());
        }
    }

    /// Returns the maximum severity merged so far.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns true when nothing worse than OK was merged.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Returns true once a fatal result was merged.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Returns true once the severity reached `threshold`.
    #[must_use]
    pub fn reached(&self, threshold: Severity) -> bool {
        threshold > Severity::Ok && self.severity >= threshold
    }

    /// The first non-OK result, if any.
    #[must_use]
    pub fn primary(&self) -> Option<&OperationStatus> {
        self.primary.as_ref()
    }

    /// Results merged after the primary result.
    #[must_use]
    pub fn children(&self) -> &[OperationStatus] {
        &self.children
    }

    /// Every merged result, in merge order.
    #[must_use]
    pub fn step_results(&self) -> &[OperationStatus] {
        &self.steps
    }

    /// Flattens into a single status tree.
    #[must_use]
    pub fn to_status(&self) -> OperationStatus {
        match &self.primary {
            Some(primary) => {
                let mut status = primary.clone();
                status.severity = self.severity;
                status.children.extend(self.children.iter().cloned());
                status
            }
            None => OperationStatus::ok(),
        }
    }
}
