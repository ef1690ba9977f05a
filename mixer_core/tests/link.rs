use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mixer_core::mocks::{MockBackend, ScriptedTransport, arduino_port};
use mixer_core::{
    DeviceLink, FrameLayout, LinkCfg, MixerError, OperatingState, ReadOutcome, SetpointVector,
    ValveState, history,
};
use mixer_traits::{ManualClock, PortInfo};
use rstest::rstest;

const LAYOUT: FrameLayout = FrameLayout::new(2, 1);

fn cfg() -> LinkCfg {
    LinkCfg {
        reset_delay: Duration::ZERO,
        response_delay: Duration::from_millis(250),
        ..LinkCfg::default()
    }
}

fn scripted_link() -> (DeviceLink, ScriptedTransport, ManualClock) {
    let clock = ManualClock::new();
    let script = ScriptedTransport::new();
    let link = DeviceLink::new(
        Box::new(MockBackend::scripted(script.clone())),
        cfg(),
        LAYOUT,
        Arc::new(clock.clone()),
    );
    (link, script, clock)
}

fn frame(seq: u64) -> String {
    format!("{seq},3,1,1.0,2.0,20.5")
}

fn manual(flows: Vec<f64>) -> SetpointVector {
    SetpointVector::new(OperatingState::RunManual, ValveState::Open, flows)
}

#[rstest]
fn discovery_matches_keywords_case_insensitively() {
    let ports = vec![
        PortInfo {
            name: "/dev/ttyS0".into(),
            description: "n/a".into(),
            hwid: "PNP0501".into(),
        },
        PortInfo {
            name: "/dev/ttyUSB0".into(),
            description: "USB-SERIAL CH340".into(),
            hwid: "USB VID:PID=1A86:7523".into(),
        },
    ];
    let backend = MockBackend::new(ports, || Box::new(ScriptedTransport::new()));
    let link = DeviceLink::new(
        Box::new(backend),
        cfg(),
        LAYOUT,
        Arc::new(ManualClock::new()),
    );
    assert_eq!(link.discover_port().as_deref(), Some("/dev/ttyUSB0"));
}

#[rstest]
fn no_matching_port_is_port_not_found() {
    let ports = vec![PortInfo {
        name: "/dev/ttyS0".into(),
        description: "16550A UART".into(),
        hwid: "PNP0501".into(),
    }];
    let backend = MockBackend::new(ports, || Box::new(ScriptedTransport::new()));
    let mut link = DeviceLink::new(
        Box::new(backend),
        cfg(),
        LAYOUT,
        Arc::new(ManualClock::new()),
    );
    assert_eq!(link.discover_port(), None);
    assert_eq!(link.connect(), Err(MixerError::PortNotFound));
    assert!(!link.is_connected());
}

#[rstest]
fn configured_port_skips_discovery() {
    let backend = MockBackend::new(vec![], || Box::new(ScriptedTransport::new()));
    let mut link = DeviceLink::new(
        Box::new(backend),
        LinkCfg {
            port: Some("COM7".into()),
            ..cfg()
        },
        LAYOUT,
        Arc::new(ManualClock::new()),
    );
    link.connect().unwrap();
    assert_eq!(link.port(), Some("COM7"));
}

#[rstest]
fn connect_twice_opens_once_and_waits_for_reset() {
    let clock = ManualClock::new();
    let backend = MockBackend::scripted(ScriptedTransport::new());
    let opens = backend.open_count();
    let mut link = DeviceLink::new(
        Box::new(backend),
        LinkCfg {
            reset_delay: Duration::from_secs(2),
            ..cfg()
        },
        LAYOUT,
        Arc::new(clock.clone()),
    );
    link.connect().unwrap();
    link.connect().unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(clock.elapsed(), Duration::from_secs(2));
    assert_eq!(link.port(), Some("/dev/ttyACM0"));

    link.disconnect();
    link.disconnect();
    assert!(!link.is_connected());
}

#[rstest]
fn failed_open_leaves_link_disconnected() {
    let backend = MockBackend::new(vec![arduino_port("COM3")], || {
        Box::new(ScriptedTransport::new())
    })
    .failing_open();
    let mut link = DeviceLink::new(
        Box::new(backend),
        cfg(),
        LAYOUT,
        Arc::new(ManualClock::new()),
    );
    assert!(matches!(link.connect(), Err(MixerError::Hardware(_))));
    assert!(!link.is_connected());
}

#[rstest]
fn send_while_disconnected_writes_nothing() {
    let (mut link, script, _clock) = scripted_link();
    let err = link.send_setpoints(&manual(vec![1.0, 2.0])).unwrap_err();
    assert_eq!(err, MixerError::NotConnected);
    assert!(script.writes().is_empty());
    assert!(history::read(&link.history()).is_empty());
}

#[rstest]
fn wrong_channel_count_is_a_protocol_error() {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    let err = link.send_setpoints(&manual(vec![1.0])).unwrap_err();
    assert!(matches!(err, MixerError::Protocol(_)));
    assert!(script.writes().is_empty());
    assert!(history::read(&link.history()).is_empty());
}

#[rstest]
fn send_records_then_reads_one_reply() {
    let (mut link, script, clock) = scripted_link();
    link.connect().unwrap();
    script.push_line(frame(1));
    link.send_setpoints(&manual(vec![1.0, 2.0])).unwrap();

    assert_eq!(script.writes(), vec!["3,1,1.0,2.0\n".to_string()]);
    assert_eq!(clock.elapsed(), Duration::from_millis(250));
    let hist = link.history();
    let h = history::read(&hist);
    assert_eq!(h.lens(), [1, 1, 1, 1]);
    assert_eq!(h.latest_setpoint().unwrap().t_ms, 0);
    assert_eq!(h.latest_response().unwrap().t_ms, 250);
    assert_eq!(h.latest_sensors().unwrap().value, vec![20.5]);
}

#[rstest]
fn read_is_idle_when_nothing_waits() {
    let (mut link, _script, _clock) = scripted_link();
    assert_eq!(link.read_telemetry(), Ok(ReadOutcome::Idle));
    link.connect().unwrap();
    assert_eq!(link.read_telemetry(), Ok(ReadOutcome::Idle));
}

#[rstest]
#[case("garbage")]
#[case("1,3,1,1.0,2.0")]
#[case("1,3,1,1.0,2.0,20.5,99.0")]
#[case("1,3,1,1.0,nan,20.5")]
#[case("-1,3,1,1.0,2.0,20.5")]
fn malformed_frames_leave_history_alone(#[case] line: &str) {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    script.push_line(line);
    assert_eq!(link.read_telemetry(), Ok(ReadOutcome::Dropped));
    assert_eq!(history::read(&link.history()).lens(), [0, 0, 0, 0]);
    assert!(link.is_connected());
    assert_eq!(link.last_sequence(), None);
}

#[rstest]
fn repeated_sequence_counts_as_stale_until_limit() {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    script.push_line(frame(7));
    assert!(matches!(link.read_telemetry(), Ok(ReadOutcome::Fresh(_))));

    for n in 1..=5 {
        script.push_line(frame(7));
        assert_eq!(link.read_telemetry(), Ok(ReadOutcome::Stale(7)));
        assert_eq!(link.stale_count(), n);
        assert!(link.is_healthy(), "stale {n} is within the limit");
    }
    script.push_line(frame(7));
    link.read_telemetry().unwrap();
    assert_eq!(link.stale_count(), 6);
    assert!(!link.is_healthy());
    assert_eq!(history::read(&link.history()).lens(), [0, 1, 1, 1]);

    script.push_line(frame(8));
    link.read_telemetry().unwrap();
    assert_eq!(link.stale_count(), 0);
    assert!(link.is_healthy());
}

#[rstest]
fn silence_makes_link_unhealthy() {
    let (mut link, script, clock) = scripted_link();
    link.connect().unwrap();
    clock.advance(Duration::from_millis(2000));
    assert!(link.is_healthy());
    clock.advance(Duration::from_millis(1));
    assert!(!link.is_healthy());
    script.push_line(frame(1));
    link.read_telemetry().unwrap();
    assert!(link.is_healthy());
}

#[rstest]
fn zero_max_silence_disables_the_check() {
    let clock = ManualClock::new();
    let mut link = DeviceLink::new(
        Box::new(MockBackend::scripted(ScriptedTransport::new())),
        LinkCfg {
            max_silence: Duration::ZERO,
            ..cfg()
        },
        LAYOUT,
        Arc::new(clock.clone()),
    );
    link.connect().unwrap();
    clock.advance(Duration::from_secs(3600));
    assert!(link.is_healthy());
}

#[rstest]
fn write_failure_marks_link_disconnected() {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    script.fail_writes(true);
    assert!(link.send_setpoints(&manual(vec![0.0, 0.0])).is_err());
    assert!(!link.is_connected());
    assert!(history::read(&link.history()).is_empty());
}

#[rstest]
fn read_failure_marks_link_disconnected() {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    script.fail_reads(true);
    assert!(link.read_telemetry().is_err());
    assert!(!link.is_connected());
    assert!(!link.is_healthy());
}

#[rstest]
fn history_survives_disconnect_and_reconnect() {
    let (mut link, script, _clock) = scripted_link();
    link.connect().unwrap();
    script.push_line(frame(1));
    link.send_setpoints(&manual(vec![1.0, 2.0])).unwrap();

    link.disconnect();
    link.connect().unwrap();
    script.push_line(frame(2));
    link.send_setpoints(&manual(vec![1.5, 2.0])).unwrap();

    let hist = link.history();
    let h = history::read(&hist);
    assert_eq!(h.lens(), [2, 2, 2, 2]);
    assert_eq!(h.setpoints()[0].value.flows, vec![1.0, 2.0]);
    assert_eq!(h.setpoints()[0].t_ms, 0);
}
