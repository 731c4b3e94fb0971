//! Status LED patterns.
//!
//! The LED is purely visual. Failures to drive it are logged and ignored.

use bench_common::IndicatorConfig;
use bench_hal::Board;
use std::time::Duration;
use tracing::warn;

/// Status LED driver.
#[derive(Debug, Clone, Copy)]
pub struct Indicator {
    startup_flashes: u32,
    completion_flashes: u32,
    flash_period: Duration,
    lit_while_waiting: bool,
}

impl Indicator {
    /// Driver for the configured patterns.
    #[must_use]
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            startup_flashes: config.startup_flashes,
            completion_flashes: config.completion_flashes,
            flash_period: config.flash_period,
            lit_while_waiting: config.lit_while_waiting,
        }
    }

    /// Flash pattern shown once at start-up.
    pub fn startup<B: Board + ?Sized>(&self, board: &mut B) {
        self.flash(board, self.startup_flashes);
    }

    /// Flash pattern shown after each logged pass.
    pub fn completion<B: Board + ?Sized>(&self, board: &mut B) {
        self.flash(board, self.completion_flashes);
    }

    /// Switch the LED for the ready wait.
    pub fn waiting<B: Board + ?Sized>(&self, board: &mut B, waiting: bool) {
        if self.lit_while_waiting {
            set(board, waiting);
        }
    }

    /// `count` on/off cycles of one flash period each.
    pub fn flash<B: Board + ?Sized>(&self, board: &mut B, count: u32) {
        for _ in 0..count {
            set(board, true);
            board.delay(self.flash_period);
            set(board, false);
            board.delay(self.flash_period);
        }
    }
}

fn set<B: Board + ?Sized>(board: &mut B, on: bool) {
    if let Err(e) = board.set_indicator(on) {
        warn!(error = %e, on, "Failed to drive status LED");
    }
}
