//! Log sink retry and failure behavior inside a full session.

use super::common::{bench, config_for, run_collect};
use bench_common::{BenchError, DeviceId, SessionState};
use bench_hal::SimulatedDut;
use bench_runtime::{FileSink, MemorySink, Session, MAX_CONSECUTIVE_ABORTS};
use std::time::Duration;

fn one_dut() -> Vec<SimulatedDut> {
    vec![SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1))]
}

#[test]
fn single_append_failure_is_retried() {
    let sim = bench(one_dut());
    let (session, summary, _) =
        run_collect(config_for(&[DeviceId::A], 2), &sim, MemorySink::new().failing(1));

    assert_eq!(summary.passes, 2);
    assert_eq!(session.sink().lines().len(), 2);
    assert_eq!(session.sink().attempts(), 3);
}

#[test]
fn failed_pass_is_dropped_and_next_pass_logged() {
    let sim = bench(one_dut());
    let (session, summary, passes) =
        run_collect(config_for(&[DeviceId::A], 2), &sim, MemorySink::new().failing(2));

    assert_eq!(summary.passes, 2);
    assert_eq!(summary.aborted_passes, 1);
    assert_eq!(passes.len(), 2);
    // No partial line from the dropped pass
    assert_eq!(
        session.sink().lines(),
        ["1.0000,1.0000,1.0000,1.0000\n", "1.0000,1.0000,1.0000,1.0000\n"]
    );
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.completed_passes(), 2);
}

#[test]
fn sink_failing_every_pass_ends_run() {
    let sim = bench(one_dut());
    let mut session = Session::new(
        config_for(&[DeviceId::A], 5),
        sim.board(),
        sim.sequencer(),
        MemorySink::new().failing(u32::MAX),
    )
    .unwrap();

    let err = session.run().unwrap_err();
    assert!(matches!(err, BenchError::LogSink(_)));
    assert!(session.sink().lines().is_empty());
    // Two attempts per pass, three passes in a row
    assert_eq!(session.sink().attempts(), 2 * MAX_CONSECUTIVE_ABORTS);
    assert_eq!(session.state(), SessionState::Finalize);
    assert_eq!(session.completed_passes(), 0);
}

#[test]
fn unwritable_results_file_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-such-dir").join("output.txt");
    let sim = bench(one_dut());

    let mut session = Session::new(
        config_for(&[DeviceId::A], 1),
        sim.board(),
        sim.sequencer(),
        FileSink::new(&path),
    )
    .unwrap();

    assert!(matches!(session.run(), Err(BenchError::LogSink(_))));
    assert!(!path.exists());
}
