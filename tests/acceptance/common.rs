//! Shared helpers for acceptance tests.

#![allow(dead_code)] // Not every helper is used by every test module

use bench_common::{
    ClockRate, DeviceId, DeviceUnderTest, OrchestratorConfig, SessionLimit, SimulatedDevice,
};
use bench_hal::{SimulatedBench, SimulatedBoard, SimulatedDut, SimulatedSequencer};
use bench_runtime::{LogSink, PassSummary, RunSummary, Session};
use std::time::Duration;

/// Simulated cycles per pin read; coarse enough to keep long waits cheap.
pub const TICK_CYCLES: u64 = 64;

/// Config for `ids` in that order with a short settle delay.
pub fn config_for(ids: &[DeviceId], sessions: u64) -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        sessions: SessionLimit::Count(sessions),
        settle_delay: Duration::from_millis(1),
        devices: ids
            .iter()
            .map(|&id| DeviceUnderTest::with_default_wiring(id))
            .collect(),
        ..Default::default()
    };
    config.simulation.tick_cycles = TICK_CYCLES;
    config.log.retry_backoff = Duration::from_millis(1);
    config
}

/// Bench of scripted DUTs at the default clock.
pub fn bench(duts: Vec<SimulatedDut>) -> SimulatedBench {
    SimulatedBench::new(ClockRate::default(), TICK_CYCLES, duts)
}

/// DUT with the reference timing profile.
pub fn reference_dut(id: DeviceId) -> SimulatedDut {
    SimulatedDut::new(id, id.default_lines(), SimulatedDevice::reference(id))
}

/// Session over the simulated bench.
pub type SimSession<L> = Session<SimulatedBoard, SimulatedSequencer, L>;

/// Run a full session, collecting every pass summary.
pub fn run_collect<L: LogSink>(
    config: OrchestratorConfig,
    bench: &SimulatedBench,
    sink: L,
) -> (SimSession<L>, RunSummary, Vec<PassSummary>) {
    let mut session = Session::new(config, bench.board(), bench.sequencer(), sink)
        .expect("valid session config");
    let mut passes = Vec::new();
    let summary = session
        .run_with(|| false, |pass| passes.push(pass.clone()))
        .expect("run completes");
    (session, summary, passes)
}

/// Whether `field` looks like `\d+\.\d{4}`.
pub fn is_duration_field(field: &str) -> bool {
    let Some((int, frac)) = field.split_once('.') else {
        return false;
    };
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.len() == 4
        && frac.bytes().all(|b| b.is_ascii_digit())
}

/// Fields of one newline-terminated log line.
pub fn fields(line: &str) -> Vec<&str> {
    line.strip_suffix('\n')
        .expect("log line is newline-terminated")
        .split(',')
        .collect()
}
