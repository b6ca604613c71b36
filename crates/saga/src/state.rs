//! Lifecycle of one saga invocation.

use serde::{Deserialize, Serialize};

/// Where a saga invocation is in its lifecycle.
///
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──► Failed
/// ```
///
/// A completed saga keeps every side effect it performed. A failed saga has
/// attempted to undo all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Steps are executing and registering compensations.
    #[default]
    Running,

    /// A step failed and registered compensations are being unwound.
    Compensating,

    /// Every step succeeded (terminal state).
    Completed,

    /// Compensation ran to the end after a failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true while steps may still register compensations.
    pub fn accepts_compensations(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
