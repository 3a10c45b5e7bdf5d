//! Core domain model types for opflow.
//!
//! This module contains the status types every other module reports with:
//! - Severity levels and per-operation status
//! - The merged status of one scheduler invocation

mod overall;
mod status;

pub use overall::OverallStatus;
pub use status::{OperationStatus, Severity};
