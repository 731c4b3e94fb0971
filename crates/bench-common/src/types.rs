//! Device, workload, and measurement model.
//!
//! Devices and workloads are closed enums: the set of benchmarked targets and
//! the order in which they execute their workloads are fixed by the DUT
//! firmware, so the orchestrator must reproduce them exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GPIO pin number on the controller board.
pub type PinNumber = u8;

/// Identity of a device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceId {
    /// First target (Rust firmware in the reference bench).
    A,
    /// Second target (C++ firmware).
    B,
    /// Third target (CircuitPython).
    C,
    /// Fourth target (MicroPython).
    D,
}

impl DeviceId {
    /// All device identities in declaration order.
    pub const ALL: [DeviceId; 4] = [DeviceId::A, DeviceId::B, DeviceId::C, DeviceId::D];

    /// Label used when the configuration does not provide one.
    #[must_use]
    pub fn default_label(self) -> &'static str {
        match self {
            Self::A => "rust",
            Self::B => "cpp",
            Self::C => "circpy",
            Self::D => "micropy",
        }
    }

    /// Controller wiring of the reference bench.
    ///
    /// Start/done pairs sit on adjacent pins (0/1, 2/3, 4/5, 6/7) and the
    /// ready lines on 10-13.
    #[must_use]
    pub fn default_lines(self) -> DeviceLines {
        let base = self as u8 * 2;
        DeviceLines {
            start_out: base,
            done_in: base + 1,
            ready_in: 10 + self as u8,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

/// Benchmark workload executed by every DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// Echo the start line straight back on the done line.
    GpioRoundTrip,
    /// Worst-case bubble sort of a reversed array.
    Sort,
    /// Repeated allocation and release of heap buffers.
    MemoryChurn,
    /// Recursive series computation.
    SeriesCompute,
}

impl Workload {
    /// Workloads in the order the DUTs execute them.
    pub const ALL: [Workload; 4] = [
        Workload::GpioRoundTrip,
        Workload::Sort,
        Workload::MemoryChurn,
        Workload::SeriesCompute,
    ];

    /// Suffix of the log column for this workload.
    #[must_use]
    pub fn column_suffix(self) -> &'static str {
        match self {
            Self::GpioRoundTrip => "GPIO",
            Self::Sort => "Sort",
            Self::MemoryChurn => "Alloc",
            Self::SeriesCompute => "Series",
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioRoundTrip => write!(f, "gpio_round_trip"),
            Self::Sort => write!(f, "sort"),
            Self::MemoryChurn => write!(f, "memory_churn"),
            Self::SeriesCompute => write!(f, "series_compute"),
        }
    }
}

/// The three GPIO lines connecting the controller to one DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLines {
    /// Controller → DUT start signal.
    pub start_out: PinNumber,
    /// DUT → controller completion signal; watched by the sequencer.
    pub done_in: PinNumber,
    /// DUT → controller readiness level.
    pub ready_in: PinNumber,
}

impl DeviceLines {
    /// All pins used by this device.
    #[must_use]
    pub fn pins(&self) -> [PinNumber; 3] {
        [self.start_out, self.done_in, self.ready_in]
    }
}

/// A configured device under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUnderTest {
    /// Device identity.
    pub id: DeviceId,
    /// Human-readable label, also the log column prefix. Empty means the
    /// default label for `id`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// Controller → DUT start line.
    pub start_out: PinNumber,
    /// DUT → controller done line.
    pub done_in: PinNumber,
    /// DUT → controller ready line.
    pub ready_in: PinNumber,
}

impl DeviceUnderTest {
    /// Device with the reference bench wiring and default label.
    #[must_use]
    pub fn with_default_wiring(id: DeviceId) -> Self {
        let lines = id.default_lines();
        Self {
            id,
            label: id.default_label().to_string(),
            start_out: lines.start_out,
            done_in: lines.done_in,
            ready_in: lines.ready_in,
        }
    }

    /// Label used for logging and log column names.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            self.id.default_label()
        } else {
            &self.label
        }
    }

    /// The device's GPIO lines.
    #[must_use]
    pub fn lines(&self) -> DeviceLines {
        DeviceLines {
            start_out: self.start_out,
            done_in: self.done_in,
            ready_in: self.ready_in,
        }
    }
}

/// Blocking step of the handshake, used to attribute timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStage {
    /// Waiting for every DUT to raise its ready line.
    AllReady,
    /// Waiting for a done line to return low before arming.
    DoneLow,
    /// Waiting for a done line to go high.
    DoneHigh,
    /// Waiting for the sequencer to latch the done edge.
    Edge,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllReady => write!(f, "all devices ready"),
            Self::DoneLow => write!(f, "done line low"),
            Self::DoneHigh => write!(f, "done line high"),
            Self::Edge => write!(f, "done edge capture"),
        }
    }
}

/// Why a measurement slot holds no duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A handshake wait exceeded the configured bound.
    Timeout,
    /// The DUT broke the handshake (done already high, edge before start).
    ProtocolViolation,
    /// Not attempted because an earlier workload on the same DUT timed out.
    Skipped,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one handshake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The edge was captured.
    Completed {
        /// Raw cycle delta between start token and captured edge.
        cycles: i64,
        /// Duration in fractional milliseconds.
        millis: f64,
    },
    /// No usable duration; the slot is logged as a sentinel.
    Failed {
        /// Failure reason.
        reason: FailureKind,
    },
}

/// One timed (device, workload) pair. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    device: DeviceId,
    workload: Workload,
    outcome: Outcome,
}

impl Measurement {
    /// A measurement with a captured duration.
    #[must_use]
    pub fn completed(device: DeviceId, workload: Workload, cycles: i64, millis: f64) -> Self {
        Self {
            device,
            workload,
            outcome: Outcome::Completed { cycles, millis },
        }
    }

    /// A sentinel measurement.
    #[must_use]
    pub fn failed(device: DeviceId, workload: Workload, reason: FailureKind) -> Self {
        Self {
            device,
            workload,
            outcome: Outcome::Failed { reason },
        }
    }

    /// Device this measurement belongs to.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Workload this measurement belongs to.
    #[must_use]
    pub fn workload(&self) -> Workload {
        self.workload
    }

    /// Measurement outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Duration in milliseconds, if the edge was captured.
    #[must_use]
    pub fn millis(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Completed { millis, .. } => Some(millis),
            Outcome::Failed { .. } => None,
        }
    }

    /// Failure reason, if the slot is a sentinel.
    #[must_use]
    pub fn failure(&self) -> Option<FailureKind> {
        match self.outcome {
            Outcome::Completed { .. } => None,
            Outcome::Failed { reason } => Some(reason),
        }
    }
}
