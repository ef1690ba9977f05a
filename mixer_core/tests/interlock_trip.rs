//! Interlock behaviour as seen through the controller.

use std::sync::Arc;
use std::time::Duration;

use mixer_core::mocks::{
    LoopbackTransport, MockBackend, ScriptedTransport, WriteLog, arduino_port,
};
use mixer_core::{
    ControlSystem, DeviceLink, FrameLayout, InterlockCfg, LinkCfg, OperatingState, RangeLimits,
    ScheduleTable, SensorLimit, ValveState,
};
use mixer_traits::{ManualClock, Transport};
use rstest::rstest;

fn link_cfg() -> LinkCfg {
    LinkCfg {
        reset_delay: Duration::ZERO,
        response_delay: Duration::from_millis(50),
        ..LinkCfg::default()
    }
}

fn no_sensors() -> InterlockCfg {
    InterlockCfg {
        setpoint: RangeLimits::new(0.0, 0.0, 10.0, 10.0),
        sensors: vec![],
        ..InterlockCfg::default()
    }
}

fn system<F>(layout: FrameLayout, interlock: InterlockCfg, make: F) -> (ControlSystem, ManualClock)
where
    F: Fn() -> Box<dyn Transport + Send> + Send + Sync + 'static,
{
    let clock = ManualClock::new();
    let backend = MockBackend::new(vec![arduino_port("/dev/ttyACM0")], make);
    let link = DeviceLink::new(
        Box::new(backend),
        link_cfg(),
        layout,
        Arc::new(clock.clone()),
    );
    let sys = ControlSystem::builder()
        .with_link(link)
        .with_interlock(interlock)
        .build()
        .expect("build");
    sys.with_link(DeviceLink::connect).expect("connect");
    (sys, clock)
}

fn tick(sys: &ControlSystem, clock: &ManualClock, cycles: usize) {
    for _ in 0..cycles {
        clock.advance(Duration::from_millis(100));
        sys.cycle();
    }
}

fn trip_text(sys: &ControlSystem) -> String {
    sys.last_trip().map(|r| r.to_string()).unwrap_or_default()
}

#[rstest]
fn response_overshoot_trips_to_estop() {
    let layout = FrameLayout::new(1, 0);
    let writes = WriteLog::default();
    let log = Arc::clone(&writes);
    // default settle window: the ceiling does not wait for it
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(
            LoopbackTransport::new(layout)
                .with_response_gain(1.3)
                .with_write_log(Arc::clone(&log)),
        )
    });

    sys.run_manual(ValveState::Open, vec![5.0]).unwrap();
    assert_eq!(sys.state(), OperatingState::RunManual);

    clock.advance(Duration::from_millis(200));
    sys.cycle();
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 1 Response above maximum");
    assert_eq!(
        writes.lock().unwrap().last().map(String::as_str),
        Some("0,0,0\n")
    );
}

#[rstest]
fn overshoot_during_a_ramp_trips() {
    let layout = FrameLayout::new(1, 0);
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout).with_response_gain(1.5))
    });
    let ramp = ScheduleTable::from_rows(&[(0.0, vec![1.0]), (60.0, vec![7.0])])
        .and_then(|t| t.resample(0.1))
        .unwrap();
    sys.load_schedule(ramp);
    sys.request_state(OperatingState::RunSchedule).unwrap();

    tick(&sys, &clock, 3);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 1 Response above maximum");
}

#[rstest]
fn zeroed_channel_that_keeps_flowing_trips() {
    let layout = FrameLayout::new(2, 0);
    let script = ScriptedTransport::new();
    let shared = script.clone();
    let (sys, clock) = system(layout, no_sensors(), move || Box::new(shared.clone()));

    sys.run_manual(ValveState::Open, vec![5.0, 0.0]).unwrap();
    script.push_line("1,3,1,5.0,8.0");
    tick(&sys, &clock, 2);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 2 Response above maximum");
}

#[rstest]
fn response_within_tolerance_keeps_running() {
    let layout = FrameLayout::new(2, 0);
    let interlock = InterlockCfg {
        settle: Duration::ZERO,
        ..no_sensors()
    };
    let (sys, clock) = system(layout, interlock, move || {
        Box::new(LoopbackTransport::new(layout).with_response_gain(1.05))
    });
    sys.run_manual(ValveState::Open, vec![5.0, 2.0]).unwrap();
    tick(&sys, &clock, 50);
    assert_eq!(sys.state(), OperatingState::RunManual, "{}", trip_text(&sys));
    assert!(sys.last_trip().is_none());
}

#[rstest]
fn lagging_response_gets_the_settle_window() {
    let layout = FrameLayout::new(1, 0);
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout).with_response_gain(0.5))
    });
    sys.run_manual(ValveState::Open, vec![4.0]).unwrap();
    tick(&sys, &clock, 40);
    assert_eq!(sys.state(), OperatingState::RunManual);

    // past the five second settle window the lagging response trips
    tick(&sys, &clock, 20);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 1 Response Error above maximum");
}

#[rstest]
fn out_of_range_setpoint_never_reaches_the_rig() {
    let layout = FrameLayout::new(1, 0);
    let writes = WriteLog::default();
    let log = Arc::clone(&writes);
    let interlock = InterlockCfg {
        setpoint: RangeLimits::new(0.0, 0.0, 9.0, 10.0),
        ..no_sensors()
    };
    let (sys, _clock) = system(layout, interlock, move || {
        Box::new(LoopbackTransport::new(layout).with_write_log(Arc::clone(&log)))
    });
    sys.run_manual(ValveState::Open, vec![12.0]).unwrap();

    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 1 Setpoint above maximum");
    assert_eq!(*writes.lock().unwrap(), vec!["0,0,0\n".to_string()]);
}

#[rstest]
fn warning_threshold_also_trips() {
    let layout = FrameLayout::new(1, 0);
    let interlock = InterlockCfg {
        setpoint: RangeLimits::new(0.0, 0.0, 9.0, 10.0),
        ..no_sensors()
    };
    let (sys, _clock) = system(layout, interlock, move || {
        Box::new(LoopbackTransport::new(layout))
    });
    sys.run_manual(ValveState::Open, vec![9.5]).unwrap();
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "MFC 1 Setpoint above warning threshold");
}

#[rstest]
fn hot_sensor_trips() {
    let layout = FrameLayout::new(1, 1);
    let interlock = InterlockCfg {
        sensors: vec![SensorLimit::new(
            "Line Temperature",
            RangeLimits::new(0.0, 5.0, 60.0, 80.0),
        )],
        ..no_sensors()
    };
    let (sys, clock) = system(layout, interlock, move || {
        Box::new(LoopbackTransport::new(layout).with_sensors(vec![95.0]))
    });
    sys.run_manual(ValveState::Open, vec![1.0]).unwrap();
    tick(&sys, &clock, 1);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "Line Temperature above maximum");
}

#[rstest]
fn valve_disagreement_trips() {
    let layout = FrameLayout::new(1, 0);
    let script = ScriptedTransport::new();
    let shared = script.clone();
    let (sys, clock) = system(layout, no_sensors(), move || Box::new(shared.clone()));

    // the rig answers with the valve still closed
    script.push_line("1,3,0,1.0");
    sys.run_manual(ValveState::Open, vec![1.0]).unwrap();
    tick(&sys, &clock, 1);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "Valve State not in desired state");
}

#[rstest]
fn silent_link_trips() {
    let layout = FrameLayout::new(1, 0);
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout))
    });
    sys.run_manual(ValveState::Open, vec![1.0]).unwrap();
    clock.advance(Duration::from_secs(3));
    sys.cycle();
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "Device Link not in desired state");
}

#[rstest]
fn stale_link_trips() {
    let layout = FrameLayout::new(1, 0);
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout).frozen())
    });
    sys.run_manual(ValveState::Open, vec![1.0]).unwrap();
    tick(&sys, &clock, 8);
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert!(trip_text(&sys).contains("Device Link not in desired state"));
}

#[rstest]
fn idle_is_never_tripped() {
    let layout = FrameLayout::new(1, 0);
    let (sys, clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout).frozen())
    });
    clock.advance(Duration::from_secs(30));
    tick(&sys, &clock, 10);
    assert_eq!(sys.state(), OperatingState::Idle);
    assert!(sys.last_trip().is_none());
}

#[rstest]
fn disconnected_run_state_trips_at_once() {
    let layout = FrameLayout::new(1, 0);
    let (sys, _clock) = system(layout, no_sensors(), move || {
        Box::new(LoopbackTransport::new(layout))
    });
    sys.with_link(DeviceLink::disconnect);
    sys.request_state(OperatingState::RunManual).unwrap();
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    assert_eq!(trip_text(&sys), "Device Link not in desired state");
}
