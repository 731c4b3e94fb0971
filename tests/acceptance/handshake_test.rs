//! Ready-wait and handshake fault handling.

use super::common::{bench, config_for, fields, run_collect, SimSession};
use bench_common::{BenchError, DeviceId, DoneDelay, FailureKind, SessionState, Workload};
use bench_hal::{ReadyScript, SimulatedDut};
use bench_runtime::{MemorySink, Session};
use std::time::Duration;

#[test]
fn flickering_ready_forces_more_polls() {
    let sim = bench(vec![
        SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1))
            .with_ready_pattern(&[false, true, true, true]),
        SimulatedDut::uniform(DeviceId::B, Duration::from_millis(1))
            .with_ready_pattern(&[true, false, false, true]),
    ]);
    let (_, _, passes) = run_collect(
        config_for(&[DeviceId::A, DeviceId::B], 1),
        &sim,
        MemorySink::new(),
    );

    // A and B are never high in the same poll until the fourth
    assert_eq!(passes[0].ready_polls, 4);
}

#[test]
fn no_workload_starts_before_all_ready() {
    let sim = bench(vec![
        SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1)),
        SimulatedDut::uniform(DeviceId::B, Duration::from_millis(1)).with_ready(ReadyScript::Never),
    ]);
    let mut session: SimSession<_> = Session::new(
        config_for(&[DeviceId::A, DeviceId::B], 1),
        sim.board(),
        sim.sequencer(),
        MemorySink::new(),
    )
    .unwrap();

    let mut polls = 0;
    let summary = session
        .run_with(
            || {
                polls += 1;
                polls > 500
            },
            |_| {},
        )
        .unwrap();

    assert!(summary.stop_requested);
    assert_eq!(summary.passes, 0);
    assert!(sim.probe().started().is_empty());
    assert!(session.sink().lines().is_empty());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn silent_device_times_out_and_next_device_is_measured() {
    let mut config = config_for(&[DeviceId::A, DeviceId::B], 1);
    config.handshake_timeout = Some(Duration::from_millis(20));

    let sim = bench(vec![
        SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1))
            .with_delay(Workload::Sort, DoneDelay::Never),
        SimulatedDut::uniform(DeviceId::B, Duration::from_millis(2)),
    ]);
    let (session, summary, passes) = run_collect(config, &sim, MemorySink::new());

    assert_eq!(summary.passes, 1);
    assert_eq!(summary.failed_measurements, 3);

    let failures: Vec<_> = passes[0]
        .record
        .measurements()
        .iter()
        .map(|m| m.failure())
        .collect();
    assert_eq!(
        failures[..4],
        [
            None,
            Some(FailureKind::Timeout),
            Some(FailureKind::Skipped),
            Some(FailureKind::Skipped)
        ]
    );

    let line = &session.sink().lines()[0];
    assert_eq!(
        fields(line),
        ["1.0000", "NaN", "NaN", "NaN", "2.0000", "2.0000", "2.0000", "2.0000"]
    );
}

#[test]
fn timed_out_device_stays_in_step_on_later_passes() {
    let mut config = config_for(&[DeviceId::A], 2);
    config.handshake_timeout = Some(Duration::from_millis(20));

    let sim = bench(vec![SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1))
        .with_delay(Workload::Sort, DoneDelay::After(Duration::from_millis(30)))
        .with_delay(Workload::MemoryChurn, DoneDelay::After(Duration::from_millis(5)))
        .with_delay(Workload::SeriesCompute, DoneDelay::After(Duration::from_millis(7)))]);
    let (session, summary, _) = run_collect(config, &sim, MemorySink::new());

    assert_eq!(summary.passes, 2);
    for line in session.sink().lines() {
        assert_eq!(fields(line), ["1.0000", "NaN", "NaN", "NaN"]);
    }

    // Every workload got its start pulse, in order, on both passes
    let started: Vec<_> = sim.probe().started().into_iter().map(|(_, w)| w).collect();
    assert_eq!(started, [Workload::ALL, Workload::ALL].concat());
}

#[test]
fn strict_mode_reports_early_done_as_violation() {
    let mut config = config_for(&[DeviceId::C], 1);
    config.strict_handshake = true;

    let sim = bench(vec![SimulatedDut::uniform(DeviceId::C, Duration::from_millis(1))
        .with_glitch_on_arm(Workload::MemoryChurn)]);
    let (session, summary, passes) = run_collect(config, &sim, MemorySink::new());

    assert_eq!(summary.failed_measurements, 1);
    assert_eq!(
        passes[0].record.measurements()[2].failure(),
        Some(FailureKind::ProtocolViolation)
    );
    assert_eq!(
        fields(&session.sink().lines()[0]),
        ["1.0000", "1.0000", "NaN", "1.0000"]
    );
}

#[test]
fn lenient_mode_keeps_under_measured_value() {
    let sim = bench(vec![SimulatedDut::uniform(DeviceId::C, Duration::from_millis(1))
        .with_glitch_on_arm(Workload::MemoryChurn)]);
    let (session, summary, _) = run_collect(config_for(&[DeviceId::C], 1), &sim, MemorySink::new());

    assert_eq!(summary.failed_measurements, 0);
    assert_eq!(
        fields(&session.sink().lines()[0]),
        ["1.0000", "1.0000", "0.0000", "1.0000"]
    );
}

#[test]
fn ready_timeout_is_reported() {
    let mut config = config_for(&[DeviceId::D], 1);
    config.ready_timeout = Some(Duration::from_millis(5));
    let sim = bench(vec![
        SimulatedDut::uniform(DeviceId::D, Duration::from_millis(1)).with_ready(ReadyScript::Never),
    ]);

    let mut session = Session::new(config, sim.board(), sim.sequencer(), MemorySink::new()).unwrap();
    let err = session.run().unwrap_err();
    assert!(matches!(err, BenchError::Timeout { .. }));
    assert!(err.is_recoverable());
    assert!(session.sink().lines().is_empty());
}
