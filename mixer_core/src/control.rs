//! Control state machine and its fixed-period loop.
//!
//! `ControlSystem` owns the operating state, the device link and the
//! interlock monitor behind one mutex. The loop thread and callers of
//! `request_state` both go through that mutex, so link I/O and transitions
//! never interleave. The current state is mirrored in an atomic for
//! lock-free reads by front ends. Observer events raised under the lock are
//! queued and delivered once it is released.
//!
//! Safety: a cycle in a run state evaluates the interlock before doing
//! anything else, and any violation forces `EmergencyStop`, which commands
//! zero flow with the valve closed before the state is recorded.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel as xch;
use eyre::WrapErr;
use mixer_traits::clock::Clock;
use tracing::{debug, error, info, warn};

use crate::config::{ControlCfg, InterlockCfg};
use crate::error::{BuildError, MixerError, Result};
use crate::history::{self, SharedHistory};
use crate::interlock::{InterlockMonitor, InterlockReport};
use crate::link::DeviceLink;
use crate::observer::{Event, NullObserver, Observer, STATE_INDICATOR};
use crate::protocol::SetpointVector;
use crate::schedule::ScheduleTable;
use crate::state::{OperatingState, ValveState};

/// Where schedule playback stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleProgress {
    /// Next row to send.
    pub index: usize,
    pub len: usize,
    /// Seconds since playback started.
    pub elapsed_s: f64,
    pub finished: bool,
}

#[derive(Debug)]
struct Playback {
    table: ScheduleTable,
    index: usize,
    started: Instant,
    finished: bool,
}

struct ControlCore {
    state: OperatingState,
    link: DeviceLink,
    monitor: InterlockMonitor,
    schedule: Option<ScheduleTable>,
    playback: Option<Playback>,
    manual: SetpointVector,
    last_trip: Option<InterlockReport>,
    /// Observer events raised under the lock, delivered once it is released.
    outbox: Vec<Event>,
}

impl ControlCore {
    fn post(&mut self, event: Event) {
        self.outbox.push(event);
    }

    fn log(&mut self, message: impl Into<String>) {
        self.post(Event::Log(message.into()));
    }
}

struct Shared {
    core: Mutex<ControlCore>,
    state_code: AtomicU8,
    running: AtomicBool,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock + Send + Sync>,
    history: SharedHistory,
    cfg: ControlCfg,
}

struct Worker {
    done: xch::Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct ControlSystem {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl core::fmt::Debug for ControlSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlSystem")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("cfg", &self.shared.cfg)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, ControlCore> {
        lock(&self.core)
    }

    fn notify(&self, message: &str) {
        self.observer.on_log(message);
    }

    /// Drop the controller lock, then deliver what was raised under it.
    fn release(&self, mut core: MutexGuard<'_, ControlCore>) {
        let events = std::mem::take(&mut core.outbox);
        drop(core);
        for e in &events {
            e.deliver(self.observer.as_ref());
        }
    }

    fn record_state(&self, core: &mut ControlCore, to: OperatingState) {
        let from = core.state;
        core.state = to;
        self.state_code.store(to.code(), Ordering::SeqCst);
        info!(from = %from, state = %to, "state changed");
        core.log(format!("State changed to {to}"));
        core.post(Event::StateChanged { from, to });
        core.post(Event::Indicator {
            name: STATE_INDICATOR.to_string(),
            value: to.name().to_string(),
        });
    }

    fn zeros(core: &ControlCore, state: OperatingState) -> SetpointVector {
        SetpointVector::zeros(state, core.link.layout().mfc_channels)
    }

    /// Send and log failures; returns whether the rig got the command.
    fn send_logged(&self, core: &mut ControlCore, v: &SetpointVector) -> bool {
        match core.link.send_setpoints(v) {
            Ok(()) => true,
            Err(e) => {
                warn!(state = %v.state, error = %e, "setpoint send failed");
                core.log(format!("Could not send setpoints: {e}"));
                false
            }
        }
    }

    fn emergency_stop(&self, core: &mut ControlCore) {
        let zeros = Self::zeros(core, OperatingState::EmergencyStop);
        self.send_logged(core, &zeros);
        core.playback = None;
        self.record_state(core, OperatingState::EmergencyStop);
    }

    /// Force EmergencyStop from a failed check. No-op when already stopped.
    fn trip(&self, core: &mut ControlCore, report: InterlockReport) {
        if core.state == OperatingState::EmergencyStop {
            return;
        }
        let summary = report.to_string();
        error!(violations = %summary, state = %core.state, "interlock tripped");
        core.log(format!("Interlock tripped: {summary}"));
        core.last_trip = Some(report);
        self.emergency_stop(core);
    }

    /// Evaluate the interlock; true when it tripped.
    fn check_interlock(&self, core: &mut ControlCore) -> bool {
        let report = {
            let h = history::read(&self.history);
            core.monitor.evaluate(
                &h,
                core.link.is_healthy(),
                core.state,
                core.link.now_ms(),
            )
        };
        if report.is_clear() {
            return false;
        }
        self.trip(core, report);
        true
    }

    /// Setpoint-range check on a vector before it goes out; true when it tripped.
    fn precheck(&self, core: &mut ControlCore, v: &SetpointVector) -> bool {
        let report = core.monitor.check_setpoints(&v.flows);
        if report.is_clear() {
            return false;
        }
        self.trip(core, report);
        true
    }

    fn enter(&self, core: &mut ControlCore, to: OperatingState) -> std::result::Result<(), MixerError> {
        match to {
            OperatingState::EmergencyStop => {
                self.emergency_stop(core);
            }
            OperatingState::Idle => {
                core.playback = None;
                self.record_state(core, to);
                let standby = Self::zeros(core, to);
                self.send_logged(core, &standby);
            }
            OperatingState::RunSchedule => {
                let channels = core.link.layout().mfc_channels;
                let table = match core.schedule.clone() {
                    None => return Err(self.reject(core, "no schedule loaded")),
                    Some(t) if t.is_empty() => {
                        return Err(self.reject(core, "loaded schedule is empty"));
                    }
                    Some(t) if t.channels() > channels => {
                        let why = format!(
                            "schedule has {} channels, rig has {channels}",
                            t.channels()
                        );
                        return Err(self.reject(core, &why));
                    }
                    Some(t) => t,
                };
                self.record_state(core, to);
                info!(rows = table.len(), duration_s = table.duration_s(), "schedule started");
                core.playback = Some(Playback {
                    table,
                    index: 0,
                    started: self.clock.now(),
                    finished: false,
                });
                if !self.check_interlock(core) {
                    self.advance_logged(core);
                }
            }
            OperatingState::RunManual => {
                core.playback = None;
                self.record_state(core, to);
                let held = core.manual.clone();
                if !self.check_interlock(core) && !self.precheck(core, &held) {
                    self.send_logged(core, &held);
                }
            }
        }
        Ok(())
    }

    fn reject(&self, core: &mut ControlCore, why: &str) -> MixerError {
        warn!(state = %core.state, reason = why, "Run Schedule rejected");
        core.log(format!("Cannot run schedule: {why}"));
        MixerError::State(why.to_string())
    }

    fn advance_logged(&self, core: &mut ControlCore) -> bool {
        match self.advance_schedule(core) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "schedule advance failed");
                core.log(format!("Schedule step failed: {e}"));
                false
            }
        }
    }

    /// Send every row whose time has come, in order, as whole vectors.
    fn advance_schedule(&self, core: &mut ControlCore) -> std::result::Result<(), MixerError> {
        let channels = core.link.layout().mfc_channels;
        loop {
            let Some(pb) = core.playback.as_mut() else {
                return Ok(());
            };
            if pb.finished {
                return Ok(());
            }
            let elapsed = self.clock.secs_since(pb.started);
            let due = pb
                .table
                .time_at(pb.index)
                .is_some_and(|t| elapsed >= t);
            if !due {
                if pb.index >= pb.table.len() {
                    pb.finished = true;
                    info!(rows = pb.table.len(), "schedule complete");
                    core.log("Schedule complete");
                }
                return Ok(());
            }
            let index = pb.index;
            let mut flows = pb.table.row(index).unwrap_or_default();
            flows.resize(channels, 0.0);
            let more_due = pb
                .table
                .time_at(index + 1)
                .is_some_and(|t| elapsed >= t);

            let v = SetpointVector::new(OperatingState::RunSchedule, ValveState::Open, flows);
            if self.precheck(core, &v) {
                return Ok(());
            }
            // rows already overdue go out back to back
            if more_due {
                core.link.write_setpoints(&v)?;
            } else {
                core.link.send_setpoints(&v)?;
            }
            debug!(index, "schedule row sent");
            if let Some(pb) = core.playback.as_mut() {
                pb.index = index + 1;
            }
        }
    }

    fn cycle(&self) {
        let mut core = self.core();
        self.cycle_locked(&mut core);
        self.release(core);
    }

    fn cycle_locked(&self, core: &mut ControlCore) {
        let state = core.state;
        if state.is_active() && self.check_interlock(core) {
            return;
        }
        if state == OperatingState::RunSchedule && !self.advance_logged(core) {
            return;
        }
        if let Err(e) = core.link.read_telemetry() {
            debug!(error = %e, "telemetry read failed");
        }
    }
}

impl ControlSystem {
    pub fn builder() -> ControlSystemBuilder {
        ControlSystemBuilder::default()
    }

    /// Current state without taking the controller lock.
    pub fn state(&self) -> OperatingState {
        OperatingState::try_from(self.shared.state_code.load(Ordering::SeqCst))
            .unwrap_or(OperatingState::EmergencyStop)
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.shared.history)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Violations behind the most recent trip.
    pub fn last_trip(&self) -> Option<InterlockReport> {
        self.shared.core().last_trip.clone()
    }

    /// Run `f` with exclusive access to the device link.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut DeviceLink) -> R) -> R {
        let mut core = self.shared.core();
        f(&mut core.link)
    }

    /// Switch state and run its entry handler on this thread.
    pub fn request_state(&self, to: OperatingState) -> Result<()> {
        let mut core = self.shared.core();
        let entered = self.shared.enter(&mut core, to);
        self.shared.release(core);
        entered.wrap_err_with(|| format!("cannot enter {to}"))
    }

    /// Integer entry point for front ends. Unknown codes stop the rig.
    pub fn request_state_code(&self, code: u8) -> Result<()> {
        match OperatingState::try_from(code) {
            Ok(state) => self.request_state(state),
            Err(e) => {
                let mut core = self.shared.core();
                error!(code, "unknown state code requested");
                core.log(format!("Unknown state code {code}; stopping"));
                self.shared.emergency_stop(&mut core);
                self.shared.release(core);
                Err(eyre::Report::new(e))
            }
        }
    }

    /// Hold a manual vector and enter RunManual, which sends it at once.
    pub fn run_manual(&self, valve: ValveState, flows: Vec<f64>) -> Result<()> {
        let mut core = self.shared.core();
        let v = SetpointVector::new(OperatingState::RunManual, valve, flows);
        v.check(&core.link.layout())
            .wrap_err("manual setpoints rejected")?;
        core.manual = v;
        let entered = self.shared.enter(&mut core, OperatingState::RunManual);
        self.shared.release(core);
        entered.wrap_err("cannot enter Run Manual")
    }

    pub fn load_schedule(&self, table: ScheduleTable) {
        info!(
            rows = table.len(),
            channels = table.channels(),
            duration_s = table.duration_s(),
            "schedule loaded"
        );
        self.shared.notify(&format!(
            "Schedule loaded: {} rows over {:.1} s",
            table.len(),
            table.duration_s()
        ));
        self.shared.core().schedule = Some(table);
    }

    pub fn schedule_progress(&self) -> Option<ScheduleProgress> {
        let core = self.shared.core();
        core.playback.as_ref().map(|pb| ScheduleProgress {
            index: pb.index,
            len: pb.table.len(),
            elapsed_s: self.shared.clock.secs_since(pb.started),
            finished: pb.finished,
        })
    }

    pub fn schedule_finished(&self) -> bool {
        self.shared
            .core()
            .playback
            .as_ref()
            .is_some_and(|pb| pb.finished)
    }

    /// One loop iteration: interlock, state handler, telemetry read.
    pub fn cycle(&self) {
        self.shared.cycle();
    }

    /// Spawn the loop thread. No-op while it is already running.
    pub fn start_loop(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("control loop already running");
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let (tx, rx) = xch::bounded(1);
        let spawned = std::thread::Builder::new()
            .name("mixer-control".into())
            .spawn(move || {
                let period = shared.cfg.resolution;
                while shared.running.load(Ordering::SeqCst) {
                    let started = shared.clock.now();
                    shared.cycle();
                    let spent = shared.clock.now().saturating_duration_since(started);
                    shared.clock.sleep(period.saturating_sub(spent));
                }
                let _ = tx.send(());
                tracing::trace!("control loop exiting cleanly");
            });
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e).wrap_err("spawn control loop");
            }
        };
        *lock(&self.worker) = Some(Worker { done: rx, handle });
        info!(period_ms = self.shared.cfg.resolution.as_millis() as u64, "control loop started");
        self.shared.notify("Control loop started");
        Ok(())
    }

    /// Stop the loop and wait a bounded time for it. Safe to call repeatedly.
    pub fn stop_loop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        match worker.done.recv_timeout(self.shared.cfg.join_timeout) {
            Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("control loop thread panicked");
                }
            }
            Err(xch::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.shared.cfg.join_timeout.as_millis() as u64,
                    "control loop did not stop in time; detaching"
                );
            }
        }
        info!("control loop stopped");
        self.shared.notify("Control loop stopped");
    }
}

impl Drop for ControlSystem {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

/// Builder for `ControlSystem`. Only the link is required.
#[derive(Default)]
pub struct ControlSystemBuilder {
    link: Option<DeviceLink>,
    control: Option<ControlCfg>,
    interlock: Option<InterlockCfg>,
    observer: Option<Arc<dyn Observer>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl ControlSystemBuilder {
    pub fn with_link(mut self, link: DeviceLink) -> Self {
        self.link = Some(link);
        self
    }
    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.control = Some(control);
        self
    }
    pub fn with_interlock(mut self, interlock: InterlockCfg) -> Self {
        self.interlock = Some(interlock);
        self
    }
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }
    /// Clock for loop pacing and schedule time; defaults to the link's clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ControlSystem> {
        let link = self
            .link
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLink))?;
        let cfg = self.control.unwrap_or_default();
        if cfg.resolution.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "loop resolution must be > 0",
            )));
        }
        if cfg.join_timeout.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "join timeout must be > 0",
            )));
        }
        let interlock = self.interlock.unwrap_or_default();
        if interlock.sensors.len() != link.layout().sensor_channels {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "sensor limits must match the sensor channel count",
            )));
        }

        let clock = self.clock.unwrap_or_else(|| link.clock());
        let history = link.history();
        let manual = SetpointVector::zeros(OperatingState::RunManual, link.layout().mfc_channels);
        let core = ControlCore {
            state: OperatingState::Idle,
            link,
            monitor: InterlockMonitor::new(interlock),
            schedule: None,
            playback: None,
            manual,
            last_trip: None,
            outbox: Vec::new(),
        };
        Ok(ControlSystem {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                state_code: AtomicU8::new(OperatingState::Idle.code()),
                running: AtomicBool::new(false),
                observer: self.observer.unwrap_or_else(|| Arc::new(NullObserver)),
                clock,
                history,
                cfg,
            }),
            worker: Mutex::new(None),
        })
    }
}

