//! Scheduler configuration.

use crate::core::Severity;
use crate::errors::OpflowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How much history an automatic rollback undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Only the run of the failing invocation.
    #[default]
    LastRun,
    /// Every run in the history, newest first.
    AllRuns,
}

/// Configuration for the operation manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Severity at which traversal halts.
    #[serde(default = "default_halt_severity")]
    pub halt_severity: Severity,
    /// Whether a halted run is undone automatically.
    #[serde(default = "default_auto_undo")]
    pub auto_undo: bool,
    /// What an automatic rollback undoes.
    #[serde(default)]
    pub rollback_scope: RollbackScope,
    /// Upper bound on waiting for an operation's resource.
    #[serde(default)]
    pub resource_acquire_timeout_ms: Option<u64>,
    /// Id of the placeholder root used when no root operation is supplied.
    #[serde(default = "default_root_operation_id")]
    pub root_operation_id: String,
}

fn default_halt_severity() -> Severity {
    Severity::Fatal
}

fn default_auto_undo() -> bool {
    true
}

fn default_root_operation_id() -> String {
    "opflow.root".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            halt_severity: default_halt_severity(),
            auto_undo: default_auto_undo(),
            rollback_scope: RollbackScope::default(),
            resource_acquire_timeout_ms: None,
            root_operation_id: default_root_operation_id(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a serialization error on malformed input or a config error if
    /// validation fails.
    pub fn from_json_str(json: &str) -> Result<Self, OpflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO, serialization or config error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OpflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks the configuration for values the scheduler cannot honor.
    ///
    /// # Errors
    ///
    /// Returns `OpflowError::Config` describing the first problem.
    pub fn validate(&self) -> Result<(), OpflowError> {
        if self.halt_severity == Severity::Ok {
            return Err(OpflowError::Config(
                "halt_severity must be warning, error or fatal".to_string(),
            ));
        }
        if self.root_operation_id.trim().is_empty() {
            return Err(OpflowError::Config(
                "root_operation_id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the halt severity.
    #[must_use]
    pub fn with_halt_severity(mut self, severity: Severity) -> Self {
        self.halt_severity = severity;
        self
    }

    /// Enables or disables automatic rollback.
    #[must_use]
    pub fn with_auto_undo(mut self, enabled: bool) -> Self {
        self.auto_undo = enabled;
        self
    }

    /// Sets the rollback scope.
    #[must_use]
    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.rollback_scope = scope;
        self
    }

    /// Sets the resource acquisition deadline.
    #[must_use]
    pub fn with_resource_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.resource_acquire_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the placeholder root id.
    #[must_use]
    pub fn with_root_operation_id(mut self, id: impl Into<String>) -> Self {
        self.root_operation_id = id.into();
        self
    }

    /// Returns the resource acquisition deadline.
    #[must_use]
    pub fn resource_acquire_timeout(&self) -> Option<Duration> {
        self.resource_acquire_timeout_ms.map(Duration::from_millis)
    }
}
