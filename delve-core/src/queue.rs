//! Pending party actions and the turn resolution state machine.
//!
//! ```text
//! Idle --enqueue--> Collecting --begin_resolve--> Resolving
//!   ^                   ^                             |
//!   |                   +------ finish (failure) -----+
//!   +------------------------- finish (success) ------+
//! ```
//!
//! At most one resolution is in flight; a failed resolution keeps every
//! queued action so it can be retried.

use thiserror::Error;

/// Why the queue refused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("a turn resolution is already in flight")]
    ResolutionInFlight,

    #[error("no actions are waiting to be resolved")]
    NothingToResolve,

    #[error("no turn resolution is in flight")]
    NotResolving,
}

/// Where the queue is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Collecting,
    Resolving,
}

/// Actions submitted since the last resolution.
#[derive(Debug, Clone, Default)]
pub struct TurnQueue {
    actions: Vec<String>,
    phase: TurnPhase,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_resolving(&self) -> bool {
        self.phase == TurnPhase::Resolving
    }

    /// Append an action. No dedup: two identical submissions are two actions.
    pub fn enqueue(&mut self, action: impl Into<String>) -> Result<(), QueueError> {
        if self.phase == TurnPhase::Resolving {
            return Err(QueueError::ResolutionInFlight);
        }
        self.actions.push(action.into());
        self.phase = TurnPhase::Collecting;
        Ok(())
    }

    /// Enter `Resolving` and return the actions that make up the turn.
    pub fn begin_resolve(&mut self) -> Result<Vec<String>, QueueError> {
        match self.phase {
            TurnPhase::Resolving => Err(QueueError::ResolutionInFlight),
            TurnPhase::Idle => Err(QueueError::NothingToResolve),
            TurnPhase::Collecting if self.actions.is_empty() => Err(QueueError::NothingToResolve),
            TurnPhase::Collecting => {
                self.phase = TurnPhase::Resolving;
                Ok(self.actions.clone())
            }
        }
    }

    /// Close the in-flight resolution. Success clears the queue; failure
    /// returns to `Collecting` with the queue untouched.
    pub fn finish_resolve(&mut self, succeeded: bool) -> Result<(), QueueError> {
        if self.phase != TurnPhase::Resolving {
            return Err(QueueError::NotResolving);
        }
        if succeeded {
            self.actions.clear();
            self.phase = TurnPhase::Idle;
        } else {
            self.phase = TurnPhase::Collecting;
        }
        Ok(())
    }

    /// Replace the contents with the server's pending list. Ignored while a
    /// resolution is in flight so the turn being resolved is not disturbed.
    pub fn mirror(&mut self, pending: &[String]) {
        if self.phase == TurnPhase::Resolving {
            return;
        }
        self.actions = pending.to_vec();
        self.phase = if self.actions.is_empty() {
            TurnPhase::Idle
        } else {
            TurnPhase::Collecting
        };
    }

    /// Drop everything, including an in-flight marker.
    pub fn reset(&mut self) {
        self.actions.clear();
        self.phase = TurnPhase::Idle;
    }
}
