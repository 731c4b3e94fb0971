//! Per-DUT signal channel.
//!
//! A thin, stateless view over the three lines of one DUT. The board is
//! passed into every call so the channel never holds a borrow across the
//! capture calls that surround it.

use crate::spin::SpinWait;
use bench_common::{BenchResult, ClockRate, DeviceLines, WaitStage};
use bench_hal::Board;
use std::time::Duration;

/// GPIO lines of one DUT plus the optional wait bound.
#[derive(Debug, Clone, Copy)]
pub struct SignalChannel {
    lines: DeviceLines,
    clock: ClockRate,
    timeout: Option<Duration>,
}

impl SignalChannel {
    /// Channel with unbounded waits.
    #[must_use]
    pub fn new(lines: DeviceLines, clock: ClockRate) -> Self {
        Self {
            lines,
            clock,
            timeout: None,
        }
    }

    /// Bound every `wait_*` call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lines this channel drives and samples.
    #[must_use]
    pub fn lines(&self) -> DeviceLines {
        self.lines
    }

    /// Drive start high.
    pub fn assert_start<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<()> {
        board.set_output(self.lines.start_out, true)
    }

    /// Drive start low.
    pub fn deassert_start<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<()> {
        board.set_output(self.lines.start_out, false)
    }

    /// Sample the done line once.
    pub fn is_done<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<bool> {
        board.read_input(self.lines.done_in)
    }

    /// Sample the ready line once.
    pub fn is_ready<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<bool> {
        board.read_input(self.lines.ready_in)
    }

    /// Spin until the done line reads high.
    ///
    /// # Errors
    ///
    /// `Timeout` if a bound is configured and expires.
    pub fn wait_done_high<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<()> {
        let done = self.lines.done_in;
        SpinWait::start(board, self.clock, WaitStage::DoneHigh, self.timeout)
            .until(board, |b| b.read_input(done))
    }

    /// Spin until the done line reads low.
    ///
    /// # Errors
    ///
    /// `Timeout` if a bound is configured and expires.
    pub fn wait_done_low<B: Board + ?Sized>(&self, board: &mut B) -> BenchResult<()> {
        let done = self.lines.done_in;
        SpinWait::start(board, self.clock, WaitStage::DoneLow, self.timeout)
            .until(board, |b| Ok(!b.read_input(done)?))
    }
}
