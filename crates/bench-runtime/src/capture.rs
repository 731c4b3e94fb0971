//! Hardware timestamp capture.
//!
//! The capture owns the edge sequencer. Arming hands out an [`ArmedCapture`]
//! that mutably borrows it, so only one arm/await pair can be in flight.
//! Dropping the armed capture disarms the sequencer, including on the
//! timeout path.

use crate::spin::SpinWait;
use bench_common::{BenchError, BenchResult, ClockRate, PinNumber, WaitStage};
use bench_hal::{Board, EdgeSequencer};
use serde::Serialize;
use std::time::Duration;
use tracing::trace;

/// Reference cycle count taken right before a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartToken {
    cycles: u64,
}

impl StartToken {
    /// Cycle count recorded by the token.
    #[must_use]
    pub fn cycles(self) -> u64 {
        self.cycles
    }
}

/// Cycle delta between a start token and a captured edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Elapsed {
    /// Signed cycle delta.
    pub cycles: i64,
    /// Delta in fractional milliseconds.
    pub millis: f64,
}

/// Timestamp capture around one owned edge sequencer.
#[derive(Debug)]
pub struct TimestampCapture<S> {
    sequencer: S,
    clock: ClockRate,
}

impl<S: EdgeSequencer> TimestampCapture<S> {
    /// Take ownership of a sequencer bound once at start-up.
    pub fn new(sequencer: S, clock: ClockRate) -> Self {
        Self { sequencer, clock }
    }

    /// Clock used for cycle conversion.
    #[must_use]
    pub fn clock(&self) -> ClockRate {
        self.clock
    }

    /// Reset the latch and start watching `pin` for a rising edge.
    ///
    /// # Errors
    ///
    /// Returns a hardware error if the sequencer cannot watch `pin`.
    pub fn arm(&mut self, pin: PinNumber) -> BenchResult<ArmedCapture<'_, S>> {
        // Clear any latch left over from the previous capture before enabling
        self.sequencer.disarm();
        self.sequencer.arm(pin)?;
        trace!(pin, "Sequencer armed");
        Ok(ArmedCapture {
            sequencer: &mut self.sequencer,
            pin,
            clock: self.clock,
        })
    }

    /// Convert a captured edge to a duration relative to `token`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the edge was latched before the token.
    pub fn elapsed(&self, token: StartToken, edge: u64) -> BenchResult<Elapsed> {
        let delta = i128::from(edge) - i128::from(token.cycles);
        if delta < 0 {
            return Err(BenchError::ProtocolViolation(format!(
                "edge latched {} cycles before start",
                -delta
            )));
        }
        let cycles = i64::try_from(delta)
            .map_err(|_| BenchError::Hardware(format!("cycle delta {delta} out of range")))?;
        Ok(Elapsed {
            cycles,
            millis: self.clock.cycles_to_millis(cycles),
        })
    }
}

/// A sequencer armed on one pin.
#[derive(Debug)]
pub struct ArmedCapture<'a, S: EdgeSequencer> {
    sequencer: &'a mut S,
    pin: PinNumber,
    clock: ClockRate,
}

impl<S: EdgeSequencer> ArmedCapture<'_, S> {
    /// Pin being watched.
    #[must_use]
    pub fn pin(&self) -> PinNumber {
        self.pin
    }

    /// Record the reference cycle count. Call right before the stimulus.
    pub fn start<B: Board + ?Sized>(&self, board: &mut B) -> StartToken {
        StartToken {
            cycles: board.cycle_count(),
        }
    }

    /// Busy-wait for the latched edge and return its cycle count.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` is set and expires first, or a
    /// hardware error from the sequencer.
    pub fn await_edge<B: Board + ?Sized>(
        self,
        board: &mut B,
        timeout: Option<Duration>,
    ) -> BenchResult<u64> {
        let mut spin = SpinWait::start(board, self.clock, WaitStage::Edge, timeout);
        let sequencer = &mut *self.sequencer;
        let edge = spin.until_some(board, |_| sequencer.poll())?;
        trace!(pin = self.pin, edge, spins = spin.spins(), "Edge captured");
        Ok(edge)
    }
}

impl<S: EdgeSequencer> Drop for ArmedCapture<'_, S> {
    fn drop(&mut self) {
        self.sequencer.disarm();
    }
}
