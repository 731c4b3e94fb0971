//! Session orchestrator.
//!
//! Drives the pass loop:
//!
//! 1. WAIT_ALL_READY: poll every ready line, proceed once all are high in
//!    the same poll
//! 2. RUN_DEVICES: run the workload handshake on each DUT in declared order
//! 3. FINALIZE: write the record as one line, flash the completion pattern
//! 4. ADVANCE: count the pass, stop at the configured limit
//!
//! A stop request is only honored while waiting for readiness, never in the
//! middle of a pass. A pass that fails in RUN_DEVICES or FINALIZE is dropped
//! and the loop restarts at WAIT_ALL_READY.

use crate::capture::TimestampCapture;
use crate::channel::SignalChannel;
use crate::indicator::Indicator;
use crate::runner::WorkloadRunner;
use crate::sink::{append_with_retry, LogSink};
use crate::spin::SpinWait;
use bench_common::{
    header_line, BenchError, BenchResult, ClockRate, OrchestratorConfig, SessionRecord,
    SessionState, StateMachine, WaitStage,
};
use bench_hal::{Board, EdgeSequencer};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Consecutive aborted passes tolerated before the run fails.
pub const MAX_CONSECUTIVE_ABORTS: u32 = 3;

/// Outcome of one logged pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    /// Zero-based pass index.
    pub session: u64,
    /// Ready polls needed before the pass could start.
    pub ready_polls: u64,
    /// Sentinel slots in the record.
    pub failed: usize,
    /// The logged line, newline included.
    pub line: String,
    /// Full record.
    pub record: SessionRecord,
}

/// Totals of one call to [`Session::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Passes logged.
    pub passes: u64,
    /// Sentinel slots across all logged passes.
    pub failed_measurements: u64,
    /// Passes abandoned after a hardware or log sink fault.
    pub aborted_passes: u64,
    /// The run ended on an external stop request.
    pub stop_requested: bool,
}

/// One measurement run over the configured devices.
pub struct Session<B, S, L> {
    config: OrchestratorConfig,
    clock: ClockRate,
    board: B,
    capture: TimestampCapture<S>,
    sink: L,
    runner: WorkloadRunner,
    indicator: Indicator,
    channels: Vec<SignalChannel>,
    state: StateMachine,
    completed: u64,
    started: bool,
}

impl<B: Board, S: EdgeSequencer, L: LogSink> Session<B, S, L> {
    /// Bind the hardware and sink to a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: OrchestratorConfig, board: B, sequencer: S, sink: L) -> BenchResult<Self> {
        config
            .validate()
            .map_err(|e| BenchError::Config(e.to_string()))?;
        let clock = config
            .clock()
            .map_err(|e| BenchError::Config(e.to_string()))?;

        let channels = config
            .devices
            .iter()
            .map(|dut| SignalChannel::new(dut.lines(), clock))
            .collect();

        Ok(Self {
            clock,
            board,
            capture: TimestampCapture::new(sequencer, clock),
            sink,
            runner: WorkloadRunner::new(&config, clock),
            indicator: Indicator::new(&config.indicator),
            channels,
            state: StateMachine::new(),
            completed: 0,
            started: false,
            config,
        })
    }

    /// Current orchestrator state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    /// Passes logged so far.
    #[must_use]
    pub fn completed_passes(&self) -> u64 {
        self.completed
    }

    /// Configuration the session runs with.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The log sink.
    #[must_use]
    pub fn sink(&self) -> &L {
        &self.sink
    }

    /// Consume the session and return its sink.
    #[must_use]
    pub fn into_sink(self) -> L {
        self.sink
    }

    /// One-time bring-up: start lines low, startup flashes, header and run
    /// marker. Called by [`Session::run`] if not called before.
    ///
    /// # Errors
    ///
    /// Returns hardware errors from driving the start lines and sink errors
    /// from writing the header or marker.
    pub fn startup(&mut self) -> BenchResult<()> {
        if self.started {
            return Ok(());
        }

        for channel in &self.channels {
            channel.deassert_start(&mut self.board)?;
        }
        self.indicator.startup(&mut self.board);

        let backoff = self.config.log.retry_backoff;
        if self.config.log.header && self.sink.is_empty()? {
            append_with_retry(&mut self.sink, &header_line(&self.config.devices), backoff)?;
        }
        if let Some(marker) = &self.config.log.run_marker {
            append_with_retry(&mut self.sink, &format!("{marker}\n"), backoff)?;
        }

        self.started = true;
        Ok(())
    }

    /// Run until the pass limit is reached.
    ///
    /// # Errors
    ///
    /// See [`Session::run_with`].
    pub fn run(&mut self) -> BenchResult<RunSummary> {
        self.run_with(|| false, |_| {})
    }

    /// Run until the pass limit is reached or `stop` returns true.
    ///
    /// `on_pass` is called after each pass has been logged. The session ends
    /// in STOPPED and cannot be run again.
    ///
    /// # Errors
    ///
    /// Returns ready-wait timeouts, and hardware or log sink faults that
    /// abort [`MAX_CONSECUTIVE_ABORTS`] passes in a row. Start-up sink
    /// failures are returned directly.
    pub fn run_with<F, P>(&mut self, mut stop: F, mut on_pass: P) -> BenchResult<RunSummary>
    where
        F: FnMut() -> bool,
        P: FnMut(&PassSummary),
    {
        self.startup()?;

        info!(
            sessions = %self.config.sessions,
            devices = self.config.devices.len(),
            backend = self.board.name(),
            clock_hz = self.clock.hz(),
            "Starting measurement run"
        );

        let mut summary = RunSummary::default();
        let mut consecutive_aborts = 0;

        loop {
            let Some(ready_polls) = self.wait_all_ready(&mut stop)? else {
                info!(completed = self.completed, "Stop requested, ending run");
                self.state.transition(SessionState::Stopped)?;
                summary.stop_requested = true;
                break;
            };

            self.state.transition(SessionState::RunDevices)?;
            let pass = self.run_devices().and_then(|record| {
                self.state.transition(SessionState::Finalize)?;
                self.finalize(record, ready_polls)
            });
            let pass = match pass {
                Ok(pass) => pass,
                Err(e) => {
                    consecutive_aborts += 1;
                    summary.aborted_passes += 1;
                    error!(
                        session = self.completed,
                        state = %self.state.state(),
                        error = %e,
                        consecutive = consecutive_aborts,
                        "Pass aborted"
                    );
                    if consecutive_aborts >= MAX_CONSECUTIVE_ABORTS {
                        return Err(e);
                    }
                    self.state.transition(SessionState::WaitAllReady)?;
                    continue;
                }
            };
            consecutive_aborts = 0;

            summary.passes += 1;
            summary.failed_measurements += pass.failed as u64;
            on_pass(&pass);

            self.state.transition(SessionState::Advance)?;
            self.completed += 1;
            if self.config.sessions.is_reached(self.completed) {
                self.state.transition(SessionState::Stopped)?;
                break;
            }
            self.state.transition(SessionState::WaitAllReady)?;
        }

        info!(
            passes = summary.passes,
            failed = summary.failed_measurements,
            aborted = summary.aborted_passes,
            "Measurement run finished"
        );
        Ok(summary)
    }

    /// Poll all ready lines until they are high together.
    ///
    /// Returns `None` if `stop` fired first.
    fn wait_all_ready<F: FnMut() -> bool>(&mut self, stop: &mut F) -> BenchResult<Option<u64>> {
        self.indicator.waiting(&mut self.board, true);

        let mut spin = SpinWait::start(
            &mut self.board,
            self.clock,
            WaitStage::AllReady,
            self.config.ready_timeout,
        );
        let channels = &self.channels;
        let mut stopped = false;
        let result = spin.until(&mut self.board, |board| {
            if stop() {
                stopped = true;
                return Ok(true);
            }
            // Sample every line each poll; readiness is not sticky
            let mut all = true;
            for channel in channels {
                all &= channel.is_ready(board)?;
            }
            Ok(all)
        });

        self.indicator.waiting(&mut self.board, false);

        if let Err(e) = result {
            warn!(error = %e, "Devices never became ready together");
            self.state.transition(SessionState::Stopped)?;
            return Err(e);
        }
        if stopped {
            return Ok(None);
        }

        debug!(polls = spin.spins(), "All devices ready");
        Ok(Some(spin.spins()))
    }

    fn run_devices(&mut self) -> BenchResult<SessionRecord> {
        let mut record = SessionRecord::new(self.completed, &self.config.devices);
        for dut in &self.config.devices {
            debug!(device = dut.label(), session = self.completed, "Running device");
            let report = self.runner.run(&mut self.board, &mut self.capture, dut)?;
            record.extend(report.measurements)?;
        }
        Ok(record)
    }

    fn finalize(&mut self, record: SessionRecord, ready_polls: u64) -> BenchResult<PassSummary> {
        let line = record.to_log_line()?;
        append_with_retry(&mut self.sink, &line, self.config.log.retry_backoff)?;

        info!(
            session = record.session(),
            failed = record.failed_count(),
            line = line.trim_end(),
            "Session logged"
        );
        self.indicator.completion(&mut self.board);

        Ok(PassSummary {
            session: record.session(),
            ready_polls,
            failed: record.failed_count(),
            line,
            record,
        })
    }
}
