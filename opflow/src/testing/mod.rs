//! Testing utilities for opflow schedulers.
//!
//! This module provides:
//! - A shared journal that mock operations write to
//! - Mock operations and scripted listeners
//! - Assertions over run outcomes

mod assertions;
mod mocks;

pub use assertions::{
    assert_executed_order, assert_run_state, assert_severity, assert_status_ok, assert_swept,
};
pub use mocks::{
    FailingOperation, Journal, PanickingOperation, RecordingOperation, ScriptedListener,
};
