//! Hardware plane of the latency bench.
//!
//! This crate provides:
//! - [`Board`] trait for GPIO access, the cycle counter, delays, and the status LED
//! - [`EdgeSequencer`] trait for the independent edge-capture unit
//! - [`simulated`] module with a deterministic bench and scripted DUTs
//! - `sysfs` module (Linux only) with sysfs GPIO, a monotonic cycle counter,
//!   and a thread-backed sequencer

pub mod simulated;
#[cfg(target_os = "linux")]
pub mod sysfs;

pub use simulated::*;
#[cfg(target_os = "linux")]
pub use sysfs::*;

use bench_common::{BenchResult, PinNumber};
use std::time::Duration;

/// Controller board abstraction.
///
/// Pin direction and pull configuration are applied when the backend is
/// constructed, so every call here is a plain read or write on the hot path.
pub trait Board: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Drive an output pin.
    fn set_output(&mut self, pin: PinNumber, high: bool) -> BenchResult<()>;

    /// Sample an input pin.
    fn read_input(&mut self, pin: PinNumber) -> BenchResult<bool>;

    /// Current value of the free-running cycle counter.
    fn cycle_count(&mut self) -> u64;

    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);

    /// Switch the status LED.
    ///
    /// Boards without an LED accept and ignore the call.
    fn set_indicator(&mut self, _on: bool) -> BenchResult<()> {
        Ok(())
    }
}

impl<B: Board + ?Sized> Board for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn set_output(&mut self, pin: PinNumber, high: bool) -> BenchResult<()> {
        (**self).set_output(pin, high)
    }

    fn read_input(&mut self, pin: PinNumber) -> BenchResult<bool> {
        (**self).read_input(pin)
    }

    fn cycle_count(&mut self) -> u64 {
        (**self).cycle_count()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration);
    }

    fn set_indicator(&mut self, on: bool) -> BenchResult<()> {
        (**self).set_indicator(on)
    }
}

/// Independent edge-capture unit.
///
/// Once armed, the sequencer watches one input pin without involvement of
/// the control thread and latches the cycle counter when the pin reads high.
/// If the pin is already high when armed, the latch fires at the arm instant.
pub trait EdgeSequencer: Send {
    /// Stop, clear any latched value, and start watching `pin`.
    fn arm(&mut self, pin: PinNumber) -> BenchResult<()>;

    /// Latched cycle count, if the edge has been observed. Never blocks.
    fn poll(&mut self) -> BenchResult<Option<u64>>;

    /// Stop watching. A latched value is discarded.
    fn disarm(&mut self);
}

impl<S: EdgeSequencer + ?Sized> EdgeSequencer for Box<S> {
    fn arm(&mut self, pin: PinNumber) -> BenchResult<()> {
        (**self).arm(pin)
    }

    fn poll(&mut self) -> BenchResult<Option<u64>> {
        (**self).poll()
    }

    fn disarm(&mut self) {
        (**self).disarm();
    }
}
