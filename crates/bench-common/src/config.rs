//! Configuration structures for the orchestrator.
//!
//! Supports TOML deserialization with defaults matching the reference bench
//! (four DUTs, 125 MHz controller clock, 500 ms settle delay) and explicit
//! values for other boards.

use crate::time::ClockRate;
use crate::types::{DeviceId, DeviceUnderTest, PinNumber, Workload};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of DUTs one controller can orchestrate.
pub const MAX_DEVICES: usize = 4;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of passes to run.
    pub sessions: SessionLimit,

    /// Pause before every workload handshake.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Pause between driving start low and arming the sequencer.
    #[serde(with = "humantime_serde")]
    pub arm_guard: Duration,

    /// Controller cycle counter frequency in hertz.
    pub clock_hz: u64,

    /// Bound on every done-line wait and edge capture. Unbounded when unset.
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub handshake_timeout: Option<Duration>,

    /// Bound on the all-ready wait. Unbounded when unset.
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ready_timeout: Option<Duration>,

    /// Reject handshakes where the done line is already high at start.
    pub strict_handshake: bool,

    /// Hardware backend.
    pub backend: BackendKind,

    /// Devices in declaration order; this order is the log column order.
    pub devices: Vec<DeviceUnderTest>,

    /// Log sink configuration.
    pub log: LogConfig,

    /// Status LED configuration.
    pub indicator: IndicatorConfig,

    /// Linux sysfs backend configuration.
    pub sysfs: SysfsConfig,

    /// Simulated bench configuration.
    pub simulation: SimulationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sessions: SessionLimit::Count(5),
            settle_delay: Duration::from_millis(500),
            arm_guard: Duration::from_micros(10),
            clock_hz: ClockRate::RP2040_DEFAULT.hz(),
            handshake_timeout: None,
            ready_timeout: None,
            strict_handshake: false,
            backend: BackendKind::Simulated,
            devices: DeviceId::ALL
                .iter()
                .map(|&id| DeviceUnderTest::with_default_wiring(id))
                .collect(),
            log: LogConfig::default(),
            indicator: IndicatorConfig::default(),
            sysfs: SysfsConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// How many passes the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLimit {
    /// Run until stopped externally.
    Unbounded,
    /// Stop cleanly after this many passes.
    Count(u64),
}

impl SessionLimit {
    /// Whether pass index `completed` (number of finished passes) ends the run.
    #[must_use]
    pub fn is_reached(self, completed: u64) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Count(n) => completed >= n,
        }
    }
}

impl fmt::Display for SessionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for SessionLimit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            SessionLimit::Unbounded => serializer.serialize_str("unbounded"),
            SessionLimit::Count(n) => serializer.serialize_u64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for SessionLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct SessionLimitVisitor;

        impl<'de> Visitor<'de> for SessionLimitVisitor {
            type Value = SessionLimit;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a positive integer or \"unbounded\"")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SessionLimit::Count(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(SessionLimit::Count)
                    .map_err(|_| de::Error::custom("session count cannot be negative"))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match value {
                    "unbounded" | "forever" => Ok(SessionLimit::Unbounded),
                    other => other
                        .parse::<u64>()
                        .map(SessionLimit::Count)
                        .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(SessionLimitVisitor)
    }
}

/// Supported hardware backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Deterministic in-memory bench for testing.
    #[default]
    Simulated,
    /// Linux sysfs GPIO with a thread-backed sequencer.
    Sysfs,
}

/// Log sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Append-only results file.
    pub path: PathBuf,

    /// Write a column header when the file is empty.
    pub header: bool,

    /// Line appended once at start-up to separate runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_marker: Option<String>,

    /// Pause before the single retry of a failed append.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output.txt"),
            header: false,
            run_marker: None,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Status LED configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Flashes at start-up.
    pub startup_flashes: u32,

    /// Flashes after each logged pass.
    pub completion_flashes: u32,

    /// On and off time of one flash.
    #[serde(with = "humantime_serde")]
    pub flash_period: Duration,

    /// Keep the LED lit while waiting for the DUTs to become ready.
    pub lit_while_waiting: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            startup_flashes: 2,
            completion_flashes: 3,
            flash_period: Duration::from_millis(100),
            lit_while_waiting: true,
        }
    }
}

/// Linux sysfs backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SysfsConfig {
    /// Root of the sysfs GPIO class directory.
    pub gpio_root: PathBuf,

    /// Brightness file of the status LED. No indicator when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<PathBuf>,

    /// Offset added to board pin numbers to get sysfs GPIO numbers.
    pub gpio_base: u32,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            gpio_root: PathBuf::from("/sys/class/gpio"),
            led: None,
            gpio_base: 0,
        }
    }
}

/// When a simulated DUT raises its done line after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneDelay {
    /// Done goes high this long after the start edge.
    After(Duration),
    /// Done never goes high.
    Never,
}

impl Serialize for DoneDelay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            DoneDelay::After(d) => {
                serializer.serialize_str(&humantime::format_duration(*d).to_string())
            }
            DoneDelay::Never => serializer.serialize_str("never"),
        }
    }
}

impl<'de> Deserialize<'de> for DoneDelay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "never" {
            return Ok(DoneDelay::Never);
        }
        humantime::parse_duration(&s)
            .map(DoneDelay::After)
            .map_err(serde::de::Error::custom)
    }
}

/// Simulated bench configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulated cycles consumed by one pin read.
    pub tick_cycles: u64,

    /// Scripted DUT timings.
    pub devices: Vec<SimulatedDevice>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_cycles: 8,
            devices: DeviceId::ALL
                .iter()
                .map(|&id| SimulatedDevice::reference(id))
                .collect(),
        }
    }
}

/// Scripted completion times of one simulated DUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Device the timings apply to.
    pub id: DeviceId,
    /// GPIO round-trip completion.
    pub gpio_round_trip: DoneDelay,
    /// Sort completion.
    pub sort: DoneDelay,
    /// Memory churn completion.
    pub memory_churn: DoneDelay,
    /// Series computation completion.
    pub series_compute: DoneDelay,
}

impl SimulatedDevice {
    /// Same completion time for every workload.
    #[must_use]
    pub fn uniform(id: DeviceId, delay: Duration) -> Self {
        let d = DoneDelay::After(delay);
        Self {
            id,
            gpio_round_trip: d,
            sort: d,
            memory_churn: d,
            series_compute: d,
        }
    }

    /// Plausible timings: compiled targets faster than interpreted ones.
    #[must_use]
    pub fn reference(id: DeviceId) -> Self {
        let scale: u64 = match id {
            DeviceId::A => 1,
            DeviceId::B => 1,
            DeviceId::C => 40,
            DeviceId::D => 25,
        };
        Self {
            id,
            gpio_round_trip: DoneDelay::After(Duration::from_micros(2 * scale)),
            sort: DoneDelay::After(Duration::from_micros(1_500 * scale)),
            memory_churn: DoneDelay::After(Duration::from_micros(400 * scale)),
            series_compute: DoneDelay::After(Duration::from_micros(900 * scale)),
        }
    }

    /// Completion time for `workload`.
    #[must_use]
    pub fn delay(&self, workload: Workload) -> DoneDelay {
        match workload {
            Workload::GpioRoundTrip => self.gpio_round_trip,
            Workload::Sort => self.sort,
            Workload::MemoryChurn => self.memory_churn,
            Workload::SeriesCompute => self.series_compute,
        }
    }

    /// Replace the completion time for `workload`.
    pub fn set_delay(&mut self, workload: Workload, delay: DoneDelay) {
        match workload {
            Workload::GpioRoundTrip => self.gpio_round_trip = delay,
            Workload::Sort => self.sort = delay,
            Workload::MemoryChurn => self.memory_churn = delay,
            Workload::SeriesCompute => self.series_compute = delay,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Clock rate of the cycle counter.
    ///
    /// # Errors
    ///
    /// Returns an error if `clock_hz` is zero.
    pub fn clock(&self) -> Result<ClockRate, ConfigError> {
        ClockRate::from_hz(self.clock_hz)
            .ok_or_else(|| ConfigError::Invalid("clock_hz must be greater than zero".into()))
    }

    /// Check device table and clock consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock()?;

        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("at least one device is required".into()));
        }
        if self.devices.len() > MAX_DEVICES {
            return Err(ConfigError::Invalid(format!(
                "{} devices configured, at most {MAX_DEVICES} supported",
                self.devices.len()
            )));
        }

        let mut ids = HashSet::new();
        let mut pins: HashSet<PinNumber> = HashSet::new();
        for dut in &self.devices {
            if !ids.insert(dut.id) {
                return Err(ConfigError::Invalid(format!(
                    "device {} declared more than once",
                    dut.id
                )));
            }
            for pin in dut.lines().pins() {
                if !pins.insert(pin) {
                    return Err(ConfigError::Invalid(format!(
                        "pin {pin} of device {} is already assigned",
                        dut.id
                    )));
                }
            }
        }

        if self.sessions == SessionLimit::Count(0) {
            return Err(ConfigError::Invalid("sessions must be at least 1".into()));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
