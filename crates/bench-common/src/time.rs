//! Cycle-count timebase.
//!
//! The controller measures in raw cycles of its system clock. Conversion to
//! wall time depends on the board's clock frequency, so it is carried as a
//! value rather than a global constant.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Clock frequency of the cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClockRate {
    hz: u64,
}

impl ClockRate {
    /// RP2040 default system clock.
    pub const RP2040_DEFAULT: ClockRate = ClockRate { hz: 125_000_000 };

    /// Create a clock rate. Returns `None` for 0 Hz.
    #[must_use]
    pub fn from_hz(hz: u64) -> Option<Self> {
        (hz > 0).then_some(Self { hz })
    }

    /// Frequency in hertz.
    #[must_use]
    pub fn hz(self) -> u64 {
        self.hz
    }

    /// Length of one cycle in nanoseconds.
    #[must_use]
    pub fn period_ns(self) -> f64 {
        1e9 / self.hz as f64
    }

    /// Convert a signed cycle delta to fractional milliseconds.
    #[must_use]
    pub fn cycles_to_millis(self, cycles: i64) -> f64 {
        cycles as f64 * 1e3 / self.hz as f64
    }

    /// Number of cycles spanning `duration`, saturating at `u64::MAX`.
    #[must_use]
    pub fn duration_to_cycles(self, duration: Duration) -> u64 {
        let cycles = duration.as_nanos() * u128::from(self.hz) / 1_000_000_000;
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    /// Wall time spanned by `cycles`.
    #[must_use]
    pub fn cycles_to_duration(self, cycles: u64) -> Duration {
        let nanos = u128::from(cycles) * 1_000_000_000 / u128::from(self.hz);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for ClockRate {
    fn default() -> Self {
        Self::RP2040_DEFAULT
    }
}
