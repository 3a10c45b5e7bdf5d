//! Error types for the opflow scheduler.
//!
//! Two families live here: [`OpflowError`] for problems detected while
//! building or configuring the scheduler, and [`StepFailure`] which
//! classifies what went wrong with a single step while traversing a run.
//! Step failures never escape `run_operations`; they are folded into the
//! merged status instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for opflow.
#[derive(Debug, Error)]
pub enum OpflowError {
    /// An operation would become its own ancestor.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// An extension was registered against an operation id the table does not know.
    #[error("Unknown extension target: '{target_id}'")]
    UnknownTarget {
        /// The requested target id.
        target_id: String,
    },

    /// A manifest referenced an operation factory that was never registered.
    #[error("No operation factory registered for '{factory_id}'")]
    UnknownFactory {
        /// The missing factory id.
        factory_id: String,
    },

    /// A data context write collided with an existing key.
    #[error("{0}")]
    DataConflict(#[from] crate::context::DataConflictError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpflowError {
    /// Creates an unknown target error.
    #[must_use]
    pub fn unknown_target(target_id: impl Into<String>) -> Self {
        Self::UnknownTarget {
            target_id: target_id.into(),
        }
    }

    /// Creates an unknown factory error.
    #[must_use]
    pub fn unknown_factory(factory_id: impl Into<String>) -> Self {
        Self::UnknownFactory {
            factory_id: factory_id.into(),
        }
    }
}

impl From<serde_json::Error> for OpflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a construction error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "OPFLOW-EXT-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised when registering an operation would make it its own ancestor.
#[derive(Debug, Clone, Error)]
#[error("Extension cycle detected: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// Operation ids forming the cycle, outermost first, repeated id last.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "OPFLOW-EXT-CYCLE",
            format!("Operation tree contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("An operation may not extend, or declare as a child, one of its own ancestors.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Classification of a single step that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// A listener declined to continue. Not an error: traversal is suspended.
    Vetoed {
        /// The operation at which traversal stopped.
        operation_id: String,
    },
    /// The operation returned an error or fatal status.
    StepFailed {
        /// The failing operation.
        operation_id: String,
        /// The status message.
        message: String,
    },
    /// The operation returned `Err` or panicked.
    StepThrew {
        /// The failing operation.
        operation_id: String,
        /// The captured error or panic message.
        message: String,
    },
    /// The operation could not be undone because it is not undoable.
    UndoPartial {
        /// The skipped operation.
        operation_id: String,
    },
    /// The declared mutex resource could not be acquired before the deadline.
    ResourceUnavailable {
        /// The operation that wanted the resource.
        operation_id: String,
        /// The resource path.
        resource: String,
    },
}

impl StepFailure {
    /// Returns the operation this failure is about.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        match self {
            Self::Vetoed { operation_id }
            | Self::StepFailed { operation_id, .. }
            | Self::StepThrew { operation_id, .. }
            | Self::UndoPartial { operation_id }
            | Self::ResourceUnavailable { operation_id, .. } => operation_id,
        }
    }

    /// Returns true when this failure escalates into the merged status.
    #[must_use]
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            Self::StepFailed { .. } | Self::StepThrew { .. } | Self::ResourceUnavailable { .. }
        )
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vetoed { operation_id } => write!(f, "Traversal vetoed at '{operation_id}'"),
            Self::StepFailed {
                operation_id,
                message,
            } => write!(f, "Operation '{operation_id}' failed: {message}"),
            Self::StepThrew {
                operation_id,
                message,
            } => write!(f, "Operation '{operation_id}' raised an unexpected fault: {message}"),
            Self::UndoPartial { operation_id } => {
                write!(f, "Operation '{operation_id}' cannot be undone")
            }
            Self::ResourceUnavailable {
                operation_id,
                resource,
            } => write!(
                f,
                "Operation '{operation_id}' could not acquire resource '{resource}'"
            ),
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "OPFLOW-EXT-CYCLE");
        assert!(err.error_info.fix_hint.is_some());
    }

    #[test]
    fn test_opflow_error_from_cycle() {
        let err: OpflowError = CycleDetectedError::new(vec!["x".into(), "x".into()]).into();
        assert!(matches!(err, OpflowError::CycleDetected(_)));
    }

    #[test]
    fn test_unknown_target_message() {
        let err = OpflowError::unknown_target("missing.op");
        assert_eq!(err.to_string(), "Unknown extension target: 'missing.op'");
    }

    #[test]
    fn test_step_failure_escalation() {
        let vetoed = StepFailure::Vetoed {
            operation_id: "a".into(),
        };
        let threw = StepFailure::StepThrew {
            operation_id: "b".into(),
            message: "boom".into(),
        };
        let partial = StepFailure::UndoPartial {
            operation_id: "c".into(),
        };

        assert!(!vetoed.escalates());
        assert!(threw.escalates());
        assert!(!partial.escalates());
        assert_eq!(threw.operation_id(), "b");
        assert!(threw.to_string().contains("boom"));
    }

    #[test]
    fn test_step_failure_serialize() {
        let failure = StepFailure::StepFailed {
            operation_id: "a".into(),
            message: "bad".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "step_failed");
        assert_eq!(json["operation_id"], "a");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
