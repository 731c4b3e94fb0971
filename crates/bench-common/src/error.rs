use crate::types::WaitStage;
use std::time::Duration;
use thiserror::Error;

/// Bench error types covering configuration, handshake faults, and sink failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A bounded handshake wait expired.
    #[error("timed out after {waited:?} waiting for {stage}")]
    Timeout {
        /// The wait that expired.
        stage: WaitStage,
        /// Configured bound that was exceeded.
        waited: Duration,
    },

    /// A DUT violated the handshake contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The log sink rejected a record.
    #[error("log sink error: {0}")]
    LogSink(String),

    /// GPIO, LED, or sequencer access failed.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// A session record was finalized before every slot was filled.
    #[error("incomplete session record: {filled} of {expected} measurements")]
    IncompleteRecord {
        /// Slots filled so far.
        filled: usize,
        /// Slots required for a full pass.
        expected: usize,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl BenchError {
    /// Whether the runner may record a sentinel and carry on.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ProtocolViolation(_))
    }
}

/// Convenience type alias for bench operations.
pub type BenchResult<T> = Result<T, BenchError>;
