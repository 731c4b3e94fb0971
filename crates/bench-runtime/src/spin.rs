//! Busy-wait primitive with an optional deadline.
//!
//! Every blocking step of the handshake is a spin on a pin or on the
//! sequencer latch. The deadline is measured on the board's cycle counter,
//! so simulated and real backends time out identically.

use bench_common::{BenchError, BenchResult, ClockRate, WaitStage};
use bench_hal::Board;
use std::time::Duration;

/// One bounded or unbounded spin.
#[derive(Debug, Clone)]
pub struct SpinWait {
    stage: WaitStage,
    timeout: Option<Duration>,
    deadline: Option<u64>,
    spins: u64,
}

impl SpinWait {
    /// Start a spin for `stage`. Without a timeout the spin never expires.
    pub fn start<B: Board + ?Sized>(
        board: &mut B,
        clock: ClockRate,
        stage: WaitStage,
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout.map(|t| {
            board
                .cycle_count()
                .saturating_add(clock.duration_to_cycles(t))
        });
        Self {
            stage,
            timeout,
            deadline,
            spins: 0,
        }
    }

    /// Number of probe calls made so far.
    #[must_use]
    pub fn spins(&self) -> u64 {
        self.spins
    }

    /// Spin until `probe` yields a value.
    ///
    /// The probe is always called at least once, even past the deadline.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` once the deadline passes, or the first error
    /// returned by `probe`.
    pub fn until_some<B, T, F>(&mut self, board: &mut B, mut probe: F) -> BenchResult<T>
    where
        B: Board + ?Sized,
        F: FnMut(&mut B) -> BenchResult<Option<T>>,
    {
        loop {
            self.spins += 1;
            if let Some(value) = probe(board)? {
                return Ok(value);
            }
            if let Some(deadline) = self.deadline {
                if board.cycle_count() >= deadline {
                    return Err(BenchError::Timeout {
                        stage: self.stage,
                        waited: self.timeout.unwrap_or_default(),
                    });
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Spin until `probe` returns true.
    ///
    /// # Errors
    ///
    /// See [`SpinWait::until_some`].
    pub fn until<B, F>(&mut self, board: &mut B, mut probe: F) -> BenchResult<()>
    where
        B: Board + ?Sized,
        F: FnMut(&mut B) -> BenchResult<bool>,
    {
        self.until_some(board, |b| Ok(probe(b)?.then_some(())))
    }
}
