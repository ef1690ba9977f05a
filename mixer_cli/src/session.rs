//! Session plumbing: config loading, backend selection and the commands that
//! drive a `ControlSystem` from start to finish.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use mixer_config::Config;
use mixer_core::{
    ControlSystem, DeviceLink, FrameLayout, LinkCfg, MixerError, Observer, OperatingState,
    ScheduleTable, ValveState, history,
};
use mixer_hardware::sim::{PlantGains, SIM_PORT_NAME, SimulatedBackend};
use mixer_traits::{Clock, LinkBackend, MonotonicClock};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::DEFAULT_CONFIG;

/// How often the foreground thread looks at the controller.
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("config: {0}")]
    Config(String),
    #[error("schedule: {0}")]
    Schedule(String),
    #[error("emergency stop: {}", .violations.join(", "))]
    EmergencyStop { violations: Vec<String> },
    #[error("interrupted by operator")]
    Interrupted,
    #[error("no telemetry received from {port}")]
    NoTelemetry { port: String },
}

/// Every message in an error chain, outermost first.
pub fn chain_text(e: &eyre::Report) -> String {
    e.chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// Read, parse and validate the config. A missing default file means defaults.
pub fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG);
            if !p.exists() {
                return Ok(Config::default());
            }
            p
        }
    };
    let text = fs::read_to_string(&path)
        .map_err(|e| SessionError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg = mixer_config::load_toml(&text)
        .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e.message())))?;
    cfg.validate()
        .map_err(|e| SessionError::Config(chain_text(&e)))?;
    Ok(cfg)
}

pub fn make_backend(cfg: &Config, sim: bool) -> eyre::Result<Box<dyn LinkBackend + Send>> {
    if sim {
        let gains = PlantGains {
            kp: cfg.simulation.kp,
            ki: cfg.simulation.ki,
            kd: cfg.simulation.kd,
            update: Duration::from_millis(cfg.simulation.update_ms),
        };
        return Ok(Box::new(SimulatedBackend::new(
            cfg.protocol.mfc_channels,
            cfg.protocol.sensor_channels,
            gains,
            Arc::new(MonotonicClock::new()),
        )));
    }
    #[cfg(feature = "hardware")]
    {
        Ok(Box::new(mixer_hardware::SerialBackend::new()))
    }
    #[cfg(not(feature = "hardware"))]
    {
        Err(SessionError::Config("built without serial support; pass --sim".into()).into())
    }
}

/// Link settings from the config; the simulated rig needs no reset wait.
pub fn link_cfg(cfg: &Config, sim: bool) -> LinkCfg {
    let mut link = LinkCfg::from(cfg);
    if sim {
        link.port = Some(SIM_PORT_NAME.to_string());
        link.reset_delay = Duration::ZERO;
    }
    link
}

pub fn build_system(
    cfg: &Config,
    sim: bool,
    observer: Arc<dyn Observer>,
) -> eyre::Result<ControlSystem> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let link = DeviceLink::new(
        make_backend(cfg, sim)?,
        link_cfg(cfg, sim),
        FrameLayout::from(&cfg.protocol),
        clock,
    );
    ControlSystem::builder()
        .with_link(link)
        .with_control((&cfg.control).into())
        .with_interlock((&cfg.interlock).into())
        .with_observer(observer)
        .build()
}

/// Prints operator messages, or JSON event lines under `--json`.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleObserver {
    json: bool,
}

impl ConsoleObserver {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl Observer for ConsoleObserver {
    fn on_state_change(&self, from: OperatingState, to: OperatingState) {
        if self.json {
            println!(
                "{}",
                json!({ "event": "state", "from": from.name(), "to": to.name() })
            );
        }
    }

    fn on_log(&self, message: &str) {
        if self.json {
            println!("{}", json!({ "event": "log", "message": message }));
        } else {
            println!("{message}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub command: &'static str,
    pub final_state: OperatingState,
    pub elapsed_s: f64,
    pub setpoints_sent: usize,
    pub frames: usize,
    /// Rows played, for schedule runs.
    pub rows: Option<usize>,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "event": "summary",
            "command": self.command,
            "final_state": self.final_state.name(),
            "elapsed_s": self.elapsed_s,
            "setpoints_sent": self.setpoints_sent,
            "frames": self.frames,
            "rows": self.rows,
        })
    }

    pub fn render(&self) -> String {
        let rows = self.rows.map(|r| format!(", {r} rows")).unwrap_or_default();
        format!(
            "{} complete in {:.1} s{rows}: {} setpoints sent, {} frames received, now {}",
            self.command, self.elapsed_s, self.setpoints_sent, self.frames, self.final_state
        )
    }
}

fn start(sys: &ControlSystem) -> eyre::Result<()> {
    sys.with_link(DeviceLink::connect)
        .wrap_err("connect to rig")?;
    sys.start_loop()
}

/// Wait until `done` holds, the interlock trips, or the operator interrupts.
fn supervise(
    sys: &ControlSystem,
    shutdown: &AtomicBool,
    mut done: impl FnMut(&ControlSystem) -> bool,
) -> Result<(), SessionError> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            warn!("interrupt received; stopping rig");
            if let Err(e) = sys.request_state(OperatingState::EmergencyStop) {
                warn!(error = %e, "emergency stop request failed");
            }
            return Err(SessionError::Interrupted);
        }
        if sys.state() == OperatingState::EmergencyStop {
            let violations = sys
                .last_trip()
                .map(|r| r.violations.iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            return Err(SessionError::EmergencyStop { violations });
        }
        if done(sys) {
            return Ok(());
        }
        thread::sleep(POLL);
    }
}

/// Leave the rig idle after a clean run, then stop the loop and let go of the port.
fn finish(
    sys: &ControlSystem,
    command: &'static str,
    started: Instant,
    rows: Option<usize>,
    clean: bool,
) -> RunSummary {
    if clean && let Err(e) = sys.request_state(OperatingState::Idle) {
        warn!(error = %e, "could not return to Idle");
    }
    sys.stop_loop();
    let hist = sys.history();
    let lens = history::read(&hist).lens();
    sys.with_link(DeviceLink::disconnect);
    RunSummary {
        command,
        final_state: sys.state(),
        elapsed_s: started.elapsed().as_secs_f64(),
        setpoints_sent: lens[0],
        frames: lens[1],
        rows,
    }
}

pub fn run_schedule(
    sys: &ControlSystem,
    cfg: &Config,
    path: &Path,
    resolution_s: Option<f64>,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary> {
    let csv = mixer_config::load_schedule_csv(path, cfg.schedule.max_duration_s)
        .map_err(|e| SessionError::Schedule(chain_text(&e)))?;
    let resolution = resolution_s.unwrap_or(cfg.schedule.resolution_s);
    let table = ScheduleTable::try_from(&csv)
        .and_then(|t| t.resample(resolution))
        .map_err(|e| SessionError::Schedule(e.to_string()))?;
    let rows = table.len();
    info!(
        path = %path.display(),
        rows,
        resolution_s = resolution,
        duration_s = table.duration_s(),
        "schedule ready"
    );
    sys.load_schedule(table);

    start(sys)?;
    let started = Instant::now();
    let result = sys
        .request_state(OperatingState::RunSchedule)
        .and_then(|()| supervise(sys, shutdown, ControlSystem::schedule_finished).map_err(Into::into));
    let summary = finish(sys, "run", started, Some(rows), result.is_ok());
    result.map(|()| summary)
}

pub fn run_manual(
    sys: &ControlSystem,
    valve: ValveState,
    flows: Vec<f64>,
    duration_s: f64,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary> {
    if !(duration_s.is_finite() && duration_s >= 0.0) {
        return Err(SessionError::Config("--duration-s must be a finite value >= 0".into()).into());
    }
    let hold = Duration::from_secs_f64(duration_s);

    start(sys)?;
    let started = Instant::now();
    let result = sys
        .run_manual(valve, flows)
        .and_then(|()| supervise(sys, shutdown, |_| started.elapsed() >= hold).map_err(Into::into));
    let summary = finish(sys, "manual", started, None, result.is_ok());
    result.map(|()| summary)
}

/// Connect, command Idle and confirm a frame came back. Returns the port used.
pub fn self_check(sys: &ControlSystem) -> eyre::Result<String> {
    sys.with_link(DeviceLink::connect)
        .wrap_err("connect to rig")?;
    sys.request_state(OperatingState::Idle)?;
    let hist = sys.history();
    let frames = history::read(&hist).lens()[1];
    let port = sys.with_link(|l| l.port().unwrap_or_default().to_string());
    sys.with_link(DeviceLink::disconnect);
    if frames == 0 {
        return Err(SessionError::NoTelemetry { port }.into());
    }
    info!(port = %port, "self-check ok");
    Ok(port)
}

pub fn list_ports(cfg: &Config, sim: bool, json_out: bool) -> eyre::Result<()> {
    let backend = make_backend(cfg, sim)?;
    let ports = backend
        .list_ports()
        .map_err(|e| MixerError::Hardware(e.to_string()))
        .wrap_err("list serial ports")?;
    let link = DeviceLink::new(
        backend,
        link_cfg(cfg, sim),
        FrameLayout::from(&cfg.protocol),
        Arc::new(MonotonicClock::new()),
    );
    let selected = link.discover_port();

    if ports.is_empty() && !json_out {
        println!("no serial ports found");
    }
    for p in &ports {
        let is_selected = selected.as_deref() == Some(p.name.as_str());
        if json_out {
            println!(
                "{}",
                json!({
                    "event": "port",
                    "name": p.name,
                    "description": p.description,
                    "hwid": p.hwid,
                    "selected": is_selected,
                })
            );
        } else {
            let mark = if is_selected { " *" } else { "" };
            println!("{}  {}  [{}]{mark}", p.name, p.description, p.hwid);
        }
    }
    Ok(())
}
