//! Orchestrator state machine.
//!
//! One pass follows:
//! WAIT_ALL_READY → RUN_DEVICES → FINALIZE → ADVANCE → WAIT_ALL_READY ...
//!
//! ADVANCE ends in STOPPED once the pass limit is reached. A pass that fails
//! in RUN_DEVICES or FINALIZE returns straight to WAIT_ALL_READY; partial
//! passes are never resumed.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Polling every DUT's ready line.
    #[default]
    WaitAllReady,
    /// Running the workload handshake on each DUT in order.
    RunDevices,
    /// Writing the record to the log sink.
    Finalize,
    /// Incrementing the pass counter.
    Advance,
    /// Pass limit reached or stop requested.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitAllReady => write!(f, "WAIT_ALL_READY"),
            Self::RunDevices => write!(f, "RUN_DEVICES"),
            Self::Finalize => write!(f, "FINALIZE"),
            Self::Advance => write!(f, "ADVANCE"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl SessionState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::{Advance, Finalize, RunDevices, Stopped, WaitAllReady};

        matches!(
            (self, target),
            (WaitAllReady, RunDevices)
                | (RunDevices, Finalize)
                | (Finalize, Advance)
                | (Advance, WaitAllReady)
                | (Advance, Stopped)
                // Aborted pass restarts from the ready wait
                | (RunDevices, WaitAllReady)
                | (Finalize, WaitAllReady)
                // Stop request before any pass started
                | (WaitAllReady, Stopped)
        )
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: SessionState,
    previous: Option<SessionState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in WAIT_ALL_READY.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<SessionState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the table forbids the move.
    pub fn transition(&mut self, target: SessionState) -> BenchResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(BenchError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
