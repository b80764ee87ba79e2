use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a batch across host invocations.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    Idle,
    Running,
    /// The invocation's time budget ran out with rows remaining.
    PausedForContinuation,
    /// The enrichment service signalled a rate limit.
    PausedForBackoff,
    /// An operator asked the batch to pause.
    PausedByUser,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Idle => "Idle",
            BatchState::Running => "Running",
            BatchState::PausedForContinuation => "PausedForContinuation",
            BatchState::PausedForBackoff => "PausedForBackoff",
            BatchState::PausedByUser => "PausedByUser",
            BatchState::Completed => "Completed",
            BatchState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Cancelled)
    }

    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            BatchState::PausedForContinuation
                | BatchState::PausedForBackoff
                | BatchState::PausedByUser
        )
    }

    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        match (self, next) {
            (Completed | Cancelled, _) => false,
            (_, Cancelled) => true,
            (Idle, Running) => true,
            (Running, PausedForContinuation | PausedForBackoff | PausedByUser | Completed) => true,
            (PausedForContinuation | PausedForBackoff | PausedByUser, Running) => true,
            // A pause request may land while the batch is waiting between invocations.
            (Idle | PausedForContinuation | PausedForBackoff, PausedByUser) => true,
            _ => false,
        }
    }

    /// Validated transition.
    pub fn transition(self, next: BatchState) -> Result<BatchState, ModelError> {
        if self == next && !self.is_terminal() {
            return Ok(next);
        }

        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
