//! Span attributes, timing and subscriber setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Which operation entry point a step ran through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    /// Forward execution.
    Execute,
    /// Compensation during rollback.
    Undo,
    /// Re-application after an undo.
    Redo,
}

impl StepPhase {
    /// Returns the phase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Attributes describing one scheduled step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpanAttributes {
    /// Operation id.
    pub operation_id: String,
    /// Run the step belongs to.
    pub run_id: String,
    /// Entry point.
    pub phase: StepPhase,
    /// Resulting severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Resource held while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Status message, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationSpanAttributes {
    /// Creates new span attributes.
    #[must_use]
    pub fn new(operation_id: impl Into<String>, run_id: impl Into<String>, phase: StepPhase) -> Self {
        Self {
            operation_id: operation_id.into(),
            run_id: run_id.into(),
            phase,
            severity: None,
            duration_ms: None,
            resource: None,
            message: None,
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the held resource.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the message, ignoring empty ones.
    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        if !message.is_empty() {
            self.message = Some(message.to_string());
        }
        self
    }

    /// Converts to flat span attributes.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        attrs.insert("operation.id".to_string(), self.operation_id.clone());
        attrs.insert("operation.run_id".to_string(), self.run_id.clone());
        attrs.insert("operation.phase".to_string(), self.phase.as_str().to_string());

        if let Some(ref v) = self.severity {
            attrs.insert("operation.severity".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("operation.duration_ms".to_string(), v.to_string());
        }
        if let Some(ref v) = self.resource {
            attrs.insert("operation.resource".to_string(), v.clone());
        }
        if let Some(ref v) = self.message {
            attrs.insert("operation.message".to_string(), v.clone());
        }

        attrs
    }

    /// Converts to an event payload.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
