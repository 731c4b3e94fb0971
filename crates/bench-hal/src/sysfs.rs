//! Linux sysfs GPIO backend.
//!
//! Pins are exported and their direction set once, when the backend is
//! opened; afterwards every access is a seek plus a one-byte read or write on
//! an already-open `value` file. Start lines are configured with direction
//! `low`, so they come up driven low.
//!
//! The edge sequencer is emulated by a dedicated monitor thread that spins on
//! the armed done line and latches the cycle counter the first time it reads
//! high. The control thread only ever polls the latch.

use crate::{Board, EdgeSequencer};
use bench_common::{BenchError, BenchResult, ClockRate, DeviceUnderTest, PinNumber, SysfsConfig};
use crossbeam_utils::CachePadded;
use nix::time::{clock_gettime, ClockId};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Delays shorter than this are spun instead of slept.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Free-running cycle counter derived from `CLOCK_MONOTONIC_RAW`.
///
/// Counts at the configured controller clock rate so that host runs report
/// cycle deltas in the same unit as the embedded controller.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicCounter {
    clock: ClockRate,
    origin_ns: u64,
}

impl MonotonicCounter {
    /// Start counting from zero now.
    #[must_use]
    pub fn new(clock: ClockRate) -> Self {
        Self {
            clock,
            origin_ns: raw_nanos(),
        }
    }

    /// Cycles elapsed since construction.
    #[must_use]
    pub fn now(&self) -> u64 {
        let elapsed = raw_nanos().saturating_sub(self.origin_ns);
        self.clock.duration_to_cycles(Duration::from_nanos(elapsed))
    }
}

fn raw_nanos() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
        Ok(ts) => {
            let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
            let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
            secs * 1_000_000_000 + nanos
        }
        Err(_) => {
            static FALLBACK: OnceLock<Instant> = OnceLock::new();
            let base = FALLBACK.get_or_init(Instant::now);
            u64::try_from(base.elapsed().as_nanos()).unwrap_or(u64::MAX)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Output, initially driven low.
    OutLow,
    Input,
}

impl Direction {
    fn as_sysfs(self) -> &'static str {
        match self {
            Self::OutLow => "low",
            Self::Input => "in",
        }
    }
}

fn hw_err(what: &str, path: &Path, e: &io::Error) -> BenchError {
    BenchError::Hardware(format!("{what} {}: {e}", path.display()))
}

/// Export `gpio` (if needed), set its direction, and open its value file.
fn open_line(root: &Path, gpio: u32, direction: Direction) -> BenchResult<File> {
    let dir = root.join(format!("gpio{gpio}"));
    if !dir.exists() {
        let export = root.join("export");
        fs::write(&export, gpio.to_string()).map_err(|e| hw_err("failed to export via", &export, &e))?;
        debug!(gpio, "Exported GPIO");
    }

    let direction_path = dir.join("direction");
    fs::write(&direction_path, direction.as_sysfs())
        .map_err(|e| hw_err("failed to set direction", &direction_path, &e))?;

    let value_path = dir.join("value");
    OpenOptions::new()
        .read(true)
        .write(matches!(direction, Direction::OutLow))
        .open(&value_path)
        .map_err(|e| hw_err("failed to open", &value_path, &e))
}

fn read_level(file: &mut File) -> io::Result<bool> {
    file.seek(SeekFrom::Start(0))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    Ok(byte[0] == b'1')
}

fn write_level(file: &mut File, high: bool) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(if high { b"1" } else { b"0" })
}

/// Board backed by sysfs GPIO and an optional sysfs LED.
#[derive(Debug)]
pub struct SysfsBoard {
    outputs: HashMap<PinNumber, File>,
    inputs: HashMap<PinNumber, File>,
    led: Option<(PathBuf, File)>,
    counter: MonotonicCounter,
}

impl SysfsBoard {
    /// Export and configure every line of `devices`.
    ///
    /// # Errors
    ///
    /// Returns a hardware error if any sysfs file cannot be written or opened.
    pub fn open(
        config: &SysfsConfig,
        devices: &[DeviceUnderTest],
        counter: MonotonicCounter,
    ) -> BenchResult<Self> {
        let mut outputs = HashMap::new();
        let mut inputs = HashMap::new();
        let gpio = |pin: PinNumber| config.gpio_base + u32::from(pin);

        for dut in devices {
            let lines = dut.lines();
            outputs.insert(
                lines.start_out,
                open_line(&config.gpio_root, gpio(lines.start_out), Direction::OutLow)?,
            );
            for pin in [lines.done_in, lines.ready_in] {
                inputs.insert(pin, open_line(&config.gpio_root, gpio(pin), Direction::Input)?);
            }
        }

        let led = match &config.led {
            Some(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .open(path)
                    .map_err(|e| hw_err("failed to open LED", path, &e))?;
                Some((path.clone(), file))
            }
            None => None,
        };

        info!(
            root = %config.gpio_root.display(),
            outputs = outputs.len(),
            inputs = inputs.len(),
            led = led.is_some(),
            "Sysfs GPIO board opened"
        );

        Ok(Self {
            outputs,
            inputs,
            led,
            counter,
        })
    }
}

impl Board for SysfsBoard {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn set_output(&mut self, pin: PinNumber, high: bool) -> BenchResult<()> {
        let file = self
            .outputs
            .get_mut(&pin)
            .ok_or_else(|| BenchError::Hardware(format!("pin {pin} is not a configured output")))?;
        write_level(file, high).map_err(|e| BenchError::Hardware(format!("write pin {pin}: {e}")))
    }

    fn read_input(&mut self, pin: PinNumber) -> BenchResult<bool> {
        let file = self
            .inputs
            .get_mut(&pin)
            .ok_or_else(|| BenchError::Hardware(format!("pin {pin} is not a configured input")))?;
        read_level(file).map_err(|e| BenchError::Hardware(format!("read pin {pin}: {e}")))
    }

    fn cycle_count(&mut self) -> u64 {
        self.counter.now()
    }

    fn delay(&mut self, duration: Duration) {
        if duration >= SPIN_THRESHOLD {
            thread::sleep(duration);
            return;
        }
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    fn set_indicator(&mut self, on: bool) -> BenchResult<()> {
        if let Some((path, file)) = &mut self.led {
            write_level(file, on).map_err(|e| hw_err("failed to write LED", path, &e))?;
        }
        Ok(())
    }
}

/// Bit marking the armed word as active.
const ARMED_BIT: u64 = 1 << 8;

/// Pack generation and pin into the armed word.
fn armed_word(generation: u64, pin: PinNumber) -> u64 {
    (generation << 16) | ARMED_BIT | u64::from(pin)
}

/// State shared between the control thread and the monitor thread.
#[derive(Debug)]
struct SequencerShared {
    /// `generation << 16 | ARMED_BIT | pin` while armed.
    armed: CachePadded<AtomicU64>,
    /// Latched cycle count.
    latched: CachePadded<AtomicU64>,
    /// Generation the latched value belongs to.
    latched_generation: CachePadded<AtomicU64>,
    /// Flag to signal the monitor thread to stop.
    stop_requested: AtomicBool,
}

/// Edge sequencer emulated by a monitor thread.
///
/// The thread and its open value files are created once; arming only swaps
/// an atomic word, so there is no reconfiguration on the measurement path.
#[derive(Debug)]
pub struct ThreadSequencer {
    shared: Arc<SequencerShared>,
    watched: Vec<PinNumber>,
    generation: u64,
    monitor_handle: Option<JoinHandle<()>>,
}

impl ThreadSequencer {
    /// Open every done line of `devices` and start the monitor thread.
    ///
    /// # Errors
    ///
    /// Returns a hardware error if a value file cannot be opened or the
    /// thread cannot be spawned.
    pub fn spawn(
        config: &SysfsConfig,
        devices: &[DeviceUnderTest],
        counter: MonotonicCounter,
    ) -> BenchResult<Self> {
        let mut files = HashMap::new();
        for dut in devices {
            let pin = dut.done_in;
            let gpio = config.gpio_base + u32::from(pin);
            let value_path = config.gpio_root.join(format!("gpio{gpio}")).join("value");
            let file = File::open(&value_path).map_err(|e| hw_err("failed to open", &value_path, &e))?;
            files.insert(pin, file);
        }
        let watched: Vec<_> = files.keys().copied().collect();

        let shared = Arc::new(SequencerShared {
            armed: CachePadded::new(AtomicU64::new(0)),
            latched: CachePadded::new(AtomicU64::new(0)),
            latched_generation: CachePadded::new(AtomicU64::new(0)),
            stop_requested: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("bench-sequencer".into())
            .spawn(move || monitor(&thread_shared, files, counter))
            .map_err(|e| BenchError::Hardware(format!("failed to spawn sequencer thread: {e}")))?;

        info!(pins = ?watched, "Sequencer monitor thread started");

        Ok(Self {
            shared,
            watched,
            generation: 0,
            monitor_handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Sequencer thread panicked: {:?}", e);
            }
        }
    }
}

fn monitor(shared: &SequencerShared, mut files: HashMap<PinNumber, File>, counter: MonotonicCounter) {
    debug!("Sequencer monitor loop running");

    while !shared.stop_requested.load(Ordering::Acquire) {
        let word = shared.armed.load(Ordering::Acquire);
        if word & ARMED_BIT == 0 {
            thread::yield_now();
            continue;
        }

        let pin = (word & 0xFF) as PinNumber;
        let Some(file) = files.get_mut(&pin) else {
            thread::yield_now();
            continue;
        };

        match read_level(file) {
            Ok(true) => {
                let now = counter.now();
                // Only latch if nobody re-armed or disarmed in the meantime
                if shared
                    .armed
                    .compare_exchange(word, word & !ARMED_BIT, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    shared.latched.store(now, Ordering::Relaxed);
                    shared.latched_generation.store(word >> 16, Ordering::Release);
                }
            }
            Ok(false) => std::hint::spin_loop(),
            Err(e) => {
                warn!(pin, error = %e, "Sequencer failed to sample pin");
                thread::yield_now();
            }
        }
    }

    debug!("Sequencer monitor loop stopped");
}

impl EdgeSequencer for ThreadSequencer {
    fn arm(&mut self, pin: PinNumber) -> BenchResult<()> {
        if !self.watched.contains(&pin) {
            return Err(BenchError::Hardware(format!(
                "sequencer cannot watch pin {pin}: not a done line"
            )));
        }
        // Generation 0 is reserved for "never latched"
        self.generation += 1;
        self.shared
            .armed
            .store(armed_word(self.generation, pin), Ordering::Release);
        Ok(())
    }

    fn poll(&mut self) -> BenchResult<Option<u64>> {
        if self.shared.latched_generation.load(Ordering::Acquire) == self.generation
            && self.generation != 0
        {
            Ok(Some(self.shared.latched.load(Ordering::Relaxed)))
        } else {
            Ok(None)
        }
    }

    fn disarm(&mut self) {
        self.shared.armed.store(self.generation << 16, Ordering::Release);
        self.generation += 1;
    }
}

impl Drop for ThreadSequencer {
    fn drop(&mut self) {
        self.stop();
    }
}
