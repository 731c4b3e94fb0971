//! Per-device workload runner.
//!
//! Runs the four-workload handshake on one DUT:
//!
//! ```text
//!   settle ─► done low? ─► start low ─► arm guard ─► arm(done)
//!        ─► [strict: done high?] ─► token ─► start high ─► await edge
//!        ─► start low ─► Measurement
//! ```
//!
//! The runner keeps no state between calls. Recoverable faults become
//! sentinel measurements; anything else aborts the device run. After a
//! timeout the remaining workloads are still pulsed so the DUT's workload
//! counter keeps matching ours.

use crate::capture::TimestampCapture;
use crate::channel::SignalChannel;
use bench_common::{
    BenchError, BenchResult, ClockRate, DeviceUnderTest, FailureKind, Measurement,
    OrchestratorConfig, Workload,
};
use bench_hal::{Board, EdgeSequencer};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handshake timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadRunner {
    clock: ClockRate,
    settle_delay: Duration,
    arm_guard: Duration,
    handshake_timeout: Option<Duration>,
    strict_handshake: bool,
}

/// Measurements of one device, in workload order.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    /// Four measurements, sentinels included.
    pub measurements: Vec<Measurement>,
    /// Recoverable errors behind the sentinels.
    #[serde(skip)]
    pub errors: Vec<BenchError>,
}

impl WorkloadRunner {
    /// Runner using the handshake settings of `config`.
    #[must_use]
    pub fn new(config: &OrchestratorConfig, clock: ClockRate) -> Self {
        Self {
            clock,
            settle_delay: config.settle_delay,
            arm_guard: config.arm_guard,
            handshake_timeout: config.handshake_timeout,
            strict_handshake: config.strict_handshake,
        }
    }

    /// Run every workload on `dut`.
    ///
    /// # Errors
    ///
    /// Returns hardware and other non-recoverable errors. Timeouts and
    /// protocol violations are folded into the report as sentinels.
    pub fn run<B, S>(
        &self,
        board: &mut B,
        capture: &mut TimestampCapture<S>,
        dut: &DeviceUnderTest,
    ) -> BenchResult<DeviceReport>
    where
        B: Board + ?Sized,
        S: EdgeSequencer,
    {
        let channel = SignalChannel::new(dut.lines(), self.clock).with_timeout(self.handshake_timeout);
        let mut report = DeviceReport {
            measurements: Vec::with_capacity(Workload::ALL.len()),
            errors: Vec::new(),
        };

        for (index, &workload) in Workload::ALL.iter().enumerate() {
            match self.measure(board, capture, &channel, dut, workload) {
                Ok(measurement) => {
                    if let Some(millis) = measurement.millis() {
                        info!(
                            device = dut.label(),
                            %workload,
                            millis = format_args!("{millis:.4}"),
                            "Measured"
                        );
                    }
                    report.measurements.push(measurement);
                }
                Err(e @ BenchError::ProtocolViolation(_)) => {
                    warn!(device = dut.label(), %workload, error = %e, "Handshake violation, recording sentinel");
                    report.measurements.push(Measurement::failed(
                        dut.id,
                        workload,
                        FailureKind::ProtocolViolation,
                    ));
                    report.errors.push(e);
                }
                Err(e @ BenchError::Timeout { .. }) => {
                    warn!(
                        device = dut.label(),
                        %workload,
                        error = %e,
                        skipped = Workload::ALL.len() - index - 1,
                        "Handshake timed out, skipping rest of device"
                    );
                    report
                        .measurements
                        .push(Measurement::failed(dut.id, workload, FailureKind::Timeout));
                    report.errors.push(e);
                    for &skipped in &Workload::ALL[index + 1..] {
                        self.pulse_skipped(board, &channel, dut, skipped)?;
                        report
                            .measurements
                            .push(Measurement::failed(dut.id, skipped, FailureKind::Skipped));
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn measure<B, S>(
        &self,
        board: &mut B,
        capture: &mut TimestampCapture<S>,
        channel: &SignalChannel,
        dut: &DeviceUnderTest,
        workload: Workload,
    ) -> BenchResult<Measurement>
    where
        B: Board + ?Sized,
        S: EdgeSequencer,
    {
        board.delay(self.settle_delay);
        channel.wait_done_low(board)?;

        channel.deassert_start(board)?;
        board.delay(self.arm_guard);
        let armed = capture.arm(dut.done_in)?;

        // A high done line here would latch at the arm instant
        let violation = if self.strict_handshake && channel.is_done(board)? {
            Some(format!(
                "{} done line already high before {workload} start",
                dut.label()
            ))
        } else {
            None
        };

        let token = armed.start(board);
        channel.assert_start(board)?;
        let edge = armed.await_edge(board, self.handshake_timeout);
        let released = channel.deassert_start(board);
        let edge = edge?;
        released?;

        if let Some(detail) = violation {
            return Err(BenchError::ProtocolViolation(detail));
        }

        let elapsed = capture.elapsed(token, edge)?;
        debug!(device = dut.label(), %workload, cycles = elapsed.cycles, "Handshake complete");
        Ok(Measurement::completed(
            dut.id,
            workload,
            elapsed.cycles,
            elapsed.millis,
        ))
    }

    /// Send the start pulse of a workload that will not be measured.
    ///
    /// The DUT advances its own workload counter on every start edge, so each
    /// skipped workload still gets one pulse. Waits are bounded by the
    /// handshake timeout and a timeout here is tolerated.
    fn pulse_skipped<B>(
        &self,
        board: &mut B,
        channel: &SignalChannel,
        dut: &DeviceUnderTest,
        workload: Workload,
    ) -> BenchResult<()>
    where
        B: Board + ?Sized,
    {
        board.delay(self.settle_delay);
        let settled = tolerate_timeout(channel.wait_done_low(board))?;
        channel.deassert_start(board)?;
        board.delay(self.arm_guard);

        channel.assert_start(board)?;
        let finished = tolerate_timeout(channel.wait_done_high(board));
        channel.deassert_start(board)?;
        let finished = finished?;

        debug!(device = dut.label(), %workload, settled, finished, "Pulsed skipped workload");
        Ok(())
    }
}

/// `Ok(false)` for a timeout, other errors pass through.
fn tolerate_timeout(result: BenchResult<()>) -> BenchResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(BenchError::Timeout { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
