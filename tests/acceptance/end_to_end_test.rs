//! Log line shape, ordering, and reproducibility.

use super::common::{bench, config_for, fields, is_duration_field, reference_dut, run_collect};
use bench_common::{DeviceId, Workload};
use bench_hal::SimulatedDut;
use bench_runtime::{FileSink, MemorySink};
use std::time::Duration;

#[test]
fn four_devices_emit_sixteen_duration_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("output.txt");
    let mut config = config_for(&DeviceId::ALL, 1);
    config.log.path.clone_from(&path);

    let sim = bench(DeviceId::ALL.iter().map(|&id| reference_dut(id)).collect());
    let (_, summary, _) = run_collect(config, &sim, FileSink::new(&path));
    assert_eq!(summary.passes, 1);
    assert_eq!(summary.failed_measurements, 0);

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with('\n'));
    let lines: Vec<_> = content.split_inclusive('\n').collect();
    assert_eq!(lines.len(), 1);

    let fields = fields(lines[0]);
    assert_eq!(fields.len(), 16);
    for field in &fields {
        assert!(is_duration_field(field), "bad field {field:?}");
    }
    // Reference profile: rust GPIO round trip takes 2 us
    assert_eq!(fields[0], "0.0020");
}

#[test]
fn two_devices_at_two_millis() {
    let sim = bench(vec![
        SimulatedDut::uniform(DeviceId::A, Duration::from_millis(2)),
        SimulatedDut::uniform(DeviceId::B, Duration::from_millis(2)),
    ]);
    let config = config_for(&[DeviceId::A, DeviceId::B], 1);
    let (session, _, _) = run_collect(config, &sim, MemorySink::new());

    let lines = session.sink().lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(fields(&lines[0]), vec!["2.0000"; 8]);

    // Device A runs all of its workloads before B starts
    let started = sim.probe().started();
    let expected: Vec<_> = [DeviceId::A, DeviceId::B]
        .iter()
        .flat_map(|&id| Workload::ALL.iter().map(move |&w| (id, w)))
        .collect();
    assert_eq!(started, expected);
}

#[test]
fn permuting_devices_permutes_columns() {
    let duts = || {
        vec![
            SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1)),
            SimulatedDut::uniform(DeviceId::C, Duration::from_millis(3)),
        ]
    };

    let (forward, _, _) = run_collect(
        config_for(&[DeviceId::A, DeviceId::C], 1),
        &bench(duts()),
        MemorySink::new(),
    );
    let (reverse, _, _) = run_collect(
        config_for(&[DeviceId::C, DeviceId::A], 1),
        &bench(duts()),
        MemorySink::new(),
    );

    let forward = fields(&forward.sink().lines()[0])
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let reverse = fields(&reverse.sink().lines()[0])
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();

    assert_eq!(forward[..4], ["1.0000"; 4]);
    assert_eq!(forward[4..], ["3.0000"; 4]);
    assert_eq!(reverse[..4], forward[4..]);
    assert_eq!(reverse[4..], forward[..4]);
}

#[test]
fn identical_timing_gives_identical_lines() {
    let run = || {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let sim = bench(vec![reference_dut(DeviceId::A), reference_dut(DeviceId::B)]);
        run_collect(
            config_for(&[DeviceId::A, DeviceId::B], 1),
            &sim,
            FileSink::new(&path),
        );
        std::fs::read(&path).unwrap()
    };

    let first = run();
    let second = run();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn multiple_passes_append_in_order() {
    let sim = bench(vec![SimulatedDut::uniform(
        DeviceId::A,
        Duration::from_micros(250),
    )]);
    let (session, summary, passes) =
        run_collect(config_for(&[DeviceId::A], 3), &sim, MemorySink::new());

    assert_eq!(summary.passes, 3);
    assert_eq!(session.completed_passes(), 3);
    let sessions: Vec<_> = passes.iter().map(|p| p.session).collect();
    assert_eq!(sessions, [0, 1, 2]);
    for (pass, line) in passes.iter().zip(session.sink().lines()) {
        assert_eq!(&pass.line, line);
        assert_eq!(fields(line), vec!["0.2500"; 4]);
    }
}

#[test]
fn header_written_once_and_marker_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("output.txt");

    for _ in 0..2 {
        let mut config = config_for(&[DeviceId::A, DeviceId::D], 1);
        config.log.header = true;
        config.log.run_marker = Some("New test!".into());
        let sim = bench(vec![
            SimulatedDut::uniform(DeviceId::A, Duration::from_millis(1)),
            SimulatedDut::uniform(DeviceId::D, Duration::from_millis(1)),
        ]);
        run_collect(config, &sim, FileSink::new(&path));
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(
        lines,
        [
            "rustGPIO,rustSort,rustAlloc,rustSeries,micropyGPIO,micropySort,micropyAlloc,micropySeries",
            "New test!",
            "1.0000,1.0000,1.0000,1.0000,1.0000,1.0000,1.0000,1.0000",
            "New test!",
            "1.0000,1.0000,1.0000,1.0000,1.0000,1.0000,1.0000,1.0000",
        ]
    );
}

#[test]
fn pass_summary_serializes_to_json() {
    let sim = bench(vec![SimulatedDut::uniform(DeviceId::B, Duration::from_millis(1))]);
    let (_, _, passes) = run_collect(config_for(&[DeviceId::B], 1), &sim, MemorySink::new());

    let json = serde_json::to_value(&passes[0]).unwrap();
    assert_eq!(json["session"], 0);
    let measurements = json["record"]["measurements"].as_array().unwrap();
    assert_eq!(measurements.len(), 4);
    assert_eq!(measurements[0]["device"], "B");
    assert_eq!(measurements[0]["workload"], "gpio_round_trip");
    assert_eq!(measurements[0]["outcome"]["status"], "completed");
}
