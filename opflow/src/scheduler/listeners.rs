//! Listener hooks around operation execution.

use crate::operations::Operation;
use serde::{Deserialize, Serialize};

/// Whether traversal may continue past a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Suspend traversal; the next invocation resumes at the same point.
    Stop,
}

impl Flow {
    /// Returns true for [`Flow::Stop`].
    #[must_use]
    pub fn is_stop(self) -> bool {
        self == Self::Stop
    }
}

impl From<bool> for Flow {
    fn from(proceed: bool) -> Self {
        if proceed {
            Self::Continue
        } else {
            Self::Stop
        }
    }
}

/// Callback notified about an operation.
///
/// Installed separately for the pre-execute, post-execute and undo hooks.
/// The undo hook's return value is ignored.
pub trait OperationListener: Send + Sync {
    /// Notifies about `operation`.
    fn notify(&self, operation: &dyn Operation) -> Flow;
}

impl<F> OperationListener for F
where
    F: Fn(&dyn Operation) -> Flow + Send + Sync,
{
    fn notify(&self, operation: &dyn Operation) -> Flow {
        self(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::NullOperation;

    #[test]
    fn test_flow_from_bool() {
        assert_eq!(Flow::from(true), Flow::Continue);
        assert_eq!(Flow::from(false), Flow::Stop);
        assert!(Flow::Stop.is_stop());
    }

    #[test]
    fn test_closure_listener() {
        let listener = |op: &dyn Operation| Flow::from(op.id() != "blocked");

        assert_eq!(listener.notify(&NullOperation::new("free")), Flow::Continue);
        assert_eq!(listener.notify(&NullOperation::new("blocked")), Flow::Stop);
    }
}
