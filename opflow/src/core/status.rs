//! Severity and per-operation status.

use crate::errors::StepFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a status, ordered from harmless to traversal-halting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Completed normally.
    #[default]
    Ok,
    /// Completed with something worth reporting.
    Warning,
    /// Failed, but not badly enough to halt traversal under the default policy.
    Error,
    /// Failed; halts traversal and triggers rollback.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// The result of executing, undoing or redoing one operation.
///
/// A status may carry children, which is how merged results are
/// represented once flattened (see [`super::OverallStatus::to_status`]).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationStatus {
    /// The severity.
    pub severity: Severity,
    /// Human readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// The operation this status belongs to, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Classification when the step did not complete normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Nested statuses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperationStatus>,
}

impl OperationStatus {
    /// Creates a status with the given severity and message.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Creates an OK status with no message.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Creates a warning status.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates an error status.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a fatal status.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, message)
    }

    /// Creates a fatal status describing a step failure.
    #[must_use]
    pub fn from_failure(failure: StepFailure) -> Self {
        Self {
            severity: Severity::Fatal,
            message: failure.to_string(),
            operation_id: Some(failure.operation_id().to_string()),
            failure: Some(failure),
            children: Vec::new(),
        }
    }

    /// Attributes the status to an operation, unless already attributed.
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        if self.operation_id.is_none() {
            self.operation_id = Some(operation_id.into());
        }
        self
    }

    /// Sets the failure classification.
    #[must_use]
    pub fn with_failure(mut self, failure: StepFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Adds a child status.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Returns true if the severity is OK.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Returns true if the severity is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Returns the maximum severity of this status and all its descendants.
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.children
            .iter()
            .map(Self::max_severity)
            .fold(self.severity, Ord::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::default(), Severity::Ok);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Ok.to_string(), "ok");
        assert_eq!(Severity::Fatal.to_string(), "fatal");
    }

    #[test]
    fn test_severity_serialize() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, r#""warning""#);

        let parsed: Severity = serde_json::from_str(r#""fatal""#).unwrap();
        assert_eq!(parsed, Severity::Fatal);
    }

    #[test]
    fn test_status_factories() {
        assert!(OperationStatus::ok().is_ok());
        assert_eq!(OperationStatus::warning("w").severity, Severity::Warning);
        assert_eq!(OperationStatus::error("e").severity, Severity::Error);
        assert!(OperationStatus::fatal("f").is_fatal());
    }

    #[test]
    fn test_with_operation_id_keeps_first() {
        let status = OperationStatus::ok()
            .with_operation_id("first")
            .with_operation_id("second");
        assert_eq!(status.operation_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_from_failure_is_fatal() {
        let status = OperationStatus::from_failure(StepFailure::StepThrew {
            operation_id: "op".into(),
            message: "boom".into(),
        });
        assert!(status.is_fatal());
        assert_eq!(status.operation_id.as_deref(), Some("op"));
        assert!(status.message.contains("boom"));
    }

    #[test]
    fn test_max_severity_descends() {
        let status = OperationStatus::warning("top")
            .with_child(OperationStatus::ok().with_child(OperationStatus::error("deep")));
        assert_eq!(status.max_severity(), Severity::Error);
    }
}
