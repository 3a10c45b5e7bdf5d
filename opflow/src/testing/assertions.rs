//! Test assertions for scheduler results.

use crate::core::{OverallStatus, Severity};
use crate::scheduler::{OperationManager, RunOutcome, RunState, SweepReport};

/// Asserts that nothing worse than OK was merged.
pub fn assert_status_ok(status: &OverallStatus) {
    assert!(
        status.is_ok(),
        "Expected OK status, got {:?}: {:?}",
        status.severity(),
        status.primary()
    );
}

/// Asserts the maximum merged severity.
pub fn assert_severity(status: &OverallStatus, expected: Severity) {
    assert_eq!(
        status.severity(),
        expected,
        "Expected severity {:?}, got {:?}",
        expected,
        status.severity()
    );
}

/// Asserts how an invocation ended.
pub fn assert_run_state(outcome: &RunOutcome, expected: RunState) {
    assert_eq!(
        outcome.state, expected,
        "Expected run state {:?}, got {:?} (status: {:?})",
        expected, outcome.state, outcome.status.primary()
    );
}

/// Asserts the ids executed by the applied runs, in order.
pub fn assert_executed_order(manager: &OperationManager, expected: &[&str]) {
    let actual = manager.executed_operation_ids();
    assert_eq!(
        actual, expected,
        "Expected execution order {expected:?}, got {actual:?}"
    );
}

/// Asserts the ids a sweep undid or redid, in order.
pub fn assert_swept(report: &SweepReport, expected: &[&str]) {
    assert_eq!(
        report.applied, expected,
        "Expected {:?} sweep {:?}, got {:?}",
        report.phase, expected, report.applied
    );
}
