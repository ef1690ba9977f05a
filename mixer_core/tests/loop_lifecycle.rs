//! Control loop thread lifecycle against the real clock.
//!
//! These tests use short periods so they finish quickly; they check that
//! start is idempotent, stop is bounded and repeatable, and that dropping
//! the system stops the thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixer_core::mocks::{MockBackend, RecordingObserver};
use mixer_core::{
    ControlCfg, ControlSystem, DeviceLink, FrameLayout, InterlockCfg, LinkCfg, OperatingState,
    ScheduleTable,
};
use mixer_traits::MonotonicClock;
use rstest::rstest;

const LAYOUT: FrameLayout = FrameLayout::new(2, 0);

fn system(observer: Arc<RecordingObserver>) -> ControlSystem {
    let link = DeviceLink::new(
        Box::new(MockBackend::loopback(LAYOUT)),
        LinkCfg {
            reset_delay: Duration::ZERO,
            response_delay: Duration::from_millis(1),
            ..LinkCfg::default()
        },
        LAYOUT,
        Arc::new(MonotonicClock::new()),
    );
    let sys = ControlSystem::builder()
        .with_link(link)
        .with_control(ControlCfg {
            resolution: Duration::from_millis(5),
            join_timeout: Duration::from_secs(1),
        })
        .with_interlock(InterlockCfg {
            sensors: vec![],
            ..InterlockCfg::default()
        })
        .with_observer(observer)
        .build()
        .expect("build");
    sys.with_link(DeviceLink::connect).expect("connect");
    sys
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[rstest]
fn start_twice_then_stop_twice() {
    let observer = Arc::new(RecordingObserver::new());
    let sys = system(observer.clone());
    assert!(!sys.is_running());

    sys.start_loop().unwrap();
    sys.start_loop().unwrap();
    assert!(sys.is_running());

    sys.stop_loop();
    sys.stop_loop();
    assert!(!sys.is_running());

    let logs = observer.logs();
    let started = logs.iter().filter(|l| *l == "Control loop started").count();
    let stopped = logs.iter().filter(|l| *l == "Control loop stopped").count();
    assert_eq!((started, stopped), (1, 1));
}

#[rstest]
fn stop_without_start_is_a_no_op() {
    let sys = system(Arc::new(RecordingObserver::new()));
    sys.stop_loop();
    assert!(!sys.is_running());
}

#[rstest]
fn loop_can_be_restarted() {
    let sys = system(Arc::new(RecordingObserver::new()));
    sys.start_loop().unwrap();
    sys.stop_loop();
    sys.start_loop().unwrap();
    assert!(sys.is_running());
    sys.stop_loop();
}

#[rstest]
fn loop_plays_a_schedule_to_the_end() {
    let sys = system(Arc::new(RecordingObserver::new()));
    let table = ScheduleTable::from_rows(&[
        (0.0, vec![1.0, 1.0]),
        (0.05, vec![2.0, 2.0]),
        (0.1, vec![0.0, 0.0]),
    ])
    .unwrap();
    sys.load_schedule(table);
    sys.start_loop().unwrap();
    sys.request_state(OperatingState::RunSchedule).unwrap();

    assert!(wait_until(Duration::from_secs(3), || sys.schedule_finished()));
    assert_eq!(sys.state(), OperatingState::RunSchedule);
    sys.stop_loop();
}

#[rstest]
fn requests_from_other_threads_are_serialized() {
    let sys = Arc::new(system(Arc::new(RecordingObserver::new())));
    sys.start_loop().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let sys = Arc::clone(&sys);
            thread::spawn(move || {
                let to = if i % 2 == 0 {
                    OperatingState::RunManual
                } else {
                    OperatingState::Idle
                };
                sys.request_state(to).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    sys.request_state(OperatingState::EmergencyStop).unwrap();
    assert_eq!(sys.state(), OperatingState::EmergencyStop);
    sys.stop_loop();
}

#[rstest]
fn dropping_the_system_stops_the_loop() {
    let observer = Arc::new(RecordingObserver::new());
    {
        let sys = system(observer.clone());
        sys.start_loop().unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    assert!(
        observer
            .logs()
            .contains(&"Control loop stopped".to_string())
    );
}
