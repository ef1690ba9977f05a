use std::sync::Arc;
use std::time::Duration;

use mixer_hardware::{PlantGains, SimulatedBackend};
use mixer_traits::{LinkBackend, MonotonicClock, wire};
use rstest::rstest;

fn open_rig(mfcs: usize, sensors: usize) -> Box<dyn mixer_traits::Transport + Send> {
    let backend = SimulatedBackend::new(
        mfcs,
        sensors,
        PlantGains::default(),
        Arc::new(MonotonicClock::new()),
    );
    backend
        .open("sim0", 115_200, Duration::from_millis(10))
        .expect("open sim rig")
}

#[rstest]
#[case(5, 4)]
#[case(1, 0)]
#[case(3, 6)]
fn telemetry_has_layout_field_count(#[case] mfcs: usize, #[case] sensors: usize) {
    let mut rig = open_rig(mfcs, sensors);
    let line = rig.read_line().unwrap().expect("sim always has a frame");
    assert_eq!(wire::split_line(&line).len(), 3 + mfcs + sensors);
}

#[test]
fn responses_track_commanded_flow() {
    let mut rig = open_rig(2, 4);
    rig.write_line("3,1,4.0,0.0\n").unwrap();
    std::thread::sleep(Duration::from_millis(1500));
    let line = rig.read_line().unwrap().unwrap();
    let fields = wire::split_line(&line);
    let mfc1 = wire::parse_float(fields[3]).unwrap();
    let mfc2 = wire::parse_float(fields[4]).unwrap();
    assert!(mfc1 > 1.0, "mfc1 = {mfc1}");
    assert!(mfc2.abs() < 0.1, "mfc2 = {mfc2}");

    // Pressure sensors sit above atmosphere once gas flows.
    let line_pressure = wire::parse_float(fields[7]).unwrap();
    assert!(line_pressure > 14.7);
}

#[test]
fn sequence_increments_per_frame() {
    let mut rig = open_rig(1, 1);
    let seqs: Vec<u64> = (0..5)
        .map(|_| {
            let line = rig.read_line().unwrap().unwrap();
            wire::parse_uint(wire::split_line(&line)[0]).unwrap()
        })
        .collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "{seqs:?}");
}

#[test]
fn malformed_command_is_rejected_without_changing_targets() {
    let mut rig = open_rig(2, 0);
    rig.write_line("1,1,2.0,2.0\n").unwrap();
    let err = rig.write_line("1,1,2.0\n").unwrap_err();
    assert!(err.to_string().contains("expected 4 fields"));
}
