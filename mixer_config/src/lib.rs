#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and schedule parsing for the gas mixing rig.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Schedule CSV loader enforces a time column, numeric cells and a
//!   strictly increasing timeline before anything reaches the control core.
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

/// Longest schedule accepted, in seconds.
pub const MAX_SCHEDULE_SECONDS: f64 = 3600.0;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialCfg {
    /// Fixed port name; discovered by keyword when absent.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Per-read timeout on the serial port (ms)
    pub timeout_ms: u64,
    /// Wait after open while the controller board resets (ms)
    pub reset_delay_ms: u64,
    /// Wait between a setpoint write and the follow-up telemetry read (ms)
    pub response_delay_ms: u64,
    /// Case-insensitive substrings matched against port description/hwid
    pub keywords: Vec<String>,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            timeout_ms: 1000,
            reset_delay_ms: 2000,
            response_delay_ms: 250,
            keywords: ["arduino", "ch340", "usb serial", "mega", "uno", "nano", "leonardo"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ProtocolCfg {
    pub mfc_channels: usize,
    pub sensor_channels: usize,
    /// Reads with an unchanged sequence number tolerated before the link is unhealthy
    pub stale_limit: u32,
    /// Longest gap without a fresh frame before the link is unhealthy (0 disables)
    pub max_silence_ms: u64,
}

impl Default for ProtocolCfg {
    fn default() -> Self {
        Self {
            mfc_channels: 5,
            sensor_channels: 4,
            stale_limit: 5,
            max_silence_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ControlCfg {
    /// Control loop period (ms)
    pub resolution_ms: u64,
    /// Bound on waiting for the loop thread in stop (ms)
    pub join_timeout_ms: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            resolution_ms: 200,
            join_timeout_ms: 1000,
        }
    }
}

/// Named range check on one sensor channel.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SensorRange {
    pub name: String,
    pub min: f64,
    pub warn_min: f64,
    pub warn_max: f64,
    pub max: f64,
}

impl SensorRange {
    fn new(name: &str, min: f64, warn_min: f64, warn_max: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            warn_min,
            warn_max,
            max,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InterlockCfg {
    pub setpoint_min: f64,
    pub setpoint_warn_min: f64,
    pub setpoint_warn_max: f64,
    pub setpoint_max: f64,
    /// Response/setpoint ratio that warns
    pub response_warn_ratio: f64,
    /// Response/setpoint ratio that trips
    pub response_max_ratio: f64,
    pub error_warn_ratio: f64,
    pub error_max_ratio: f64,
    /// Hold time before a channel's relative error is checked (ms)
    pub settle_ms: u64,
    /// Setpoints closer than this to zero get an absolute response ceiling
    pub idle_band: f64,
    pub sensors: Vec<SensorRange>,
}

impl Default for InterlockCfg {
    fn default() -> Self {
        Self {
            setpoint_min: 0.0,
            setpoint_warn_min: 0.0,
            setpoint_warn_max: 9.0,
            setpoint_max: 10.0,
            response_warn_ratio: 1.1,
            response_max_ratio: 1.2,
            error_warn_ratio: 0.1,
            error_max_ratio: 0.2,
            settle_ms: 5000,
            idle_band: 0.05,
            sensors: vec![
                SensorRange::new("Mixing Chamber Pressure", 0.0, 0.0, 135.0, 150.0),
                SensorRange::new("Nozzle Pressure", 0.0, 0.0, 135.0, 150.0),
                SensorRange::new("Line Pressure", 0.0, 0.0, 135.0, 150.0),
                SensorRange::new("Line Temperature", 0.0, 5.0, 60.0, 80.0),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SimulationCfg {
    /// Use the simulated rig instead of a serial port
    pub enabled: bool,
    pub update_ms: u64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            update_ms: 50,
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ScheduleCfg {
    /// Resampling step applied to loaded schedules (s)
    pub resolution_s: f64,
    pub max_duration_s: f64,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            resolution_s: 0.1,
            max_duration_s: MAX_SCHEDULE_SECONDS,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub serial: SerialCfg,
    pub protocol: ProtocolCfg,
    pub control: ControlCfg,
    pub interlock: InterlockCfg,
    pub simulation: SimulationCfg,
    pub schedule: ScheduleCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn check_range(section: &str, r: [f64; 4]) -> eyre::Result<()> {
    let [min, warn_min, warn_max, max] = r;
    if r.iter().any(|v| !v.is_finite()) {
        eyre::bail!("{section} limits must be finite");
    }
    if !(min <= warn_min && warn_min <= warn_max && warn_max <= max) {
        eyre::bail!("{section} limits must satisfy min <= warn_min <= warn_max <= max");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.baud_rate == 0 {
            eyre::bail!("serial.baud_rate must be > 0");
        }
        if self.serial.timeout_ms == 0 {
            eyre::bail!("serial.timeout_ms must be >= 1");
        }
        if self.serial.reset_delay_ms > 60_000 {
            eyre::bail!("serial.reset_delay_ms is unreasonably large (>60s)");
        }
        if self.serial.response_delay_ms > 10_000 {
            eyre::bail!("serial.response_delay_ms is unreasonably large (>10s)");
        }
        if self.serial.port.is_none()
            && !self.simulation.enabled
            && self.serial.keywords.iter().all(|k| k.trim().is_empty())
        {
            eyre::bail!("serial.keywords must not be empty when serial.port is unset");
        }

        // Protocol
        if self.protocol.mfc_channels == 0 {
            eyre::bail!("protocol.mfc_channels must be >= 1");
        }
        if self.protocol.mfc_channels > 64 || self.protocol.sensor_channels > 64 {
            eyre::bail!("protocol channel counts must be <= 64");
        }

        // Control
        if self.control.resolution_ms == 0 {
            eyre::bail!("control.resolution_ms must be >= 1");
        }
        if self.control.resolution_ms > 60_000 {
            eyre::bail!("control.resolution_ms is unreasonably large (>60s)");
        }
        if self.control.join_timeout_ms == 0 {
            eyre::bail!("control.join_timeout_ms must be >= 1");
        }

        // Interlock
        let il = &self.interlock;
        check_range(
            "interlock.setpoint",
            [
                il.setpoint_min,
                il.setpoint_warn_min,
                il.setpoint_warn_max,
                il.setpoint_max,
            ],
        )?;
        if !(il.response_warn_ratio >= 1.0 && il.response_warn_ratio <= il.response_max_ratio) {
            eyre::bail!("interlock.response ratios must satisfy 1.0 <= warn <= max");
        }
        if !(il.error_warn_ratio > 0.0 && il.error_warn_ratio <= il.error_max_ratio) {
            eyre::bail!("interlock.error ratios must satisfy 0.0 < warn <= max");
        }
        if !(il.idle_band.is_finite() && il.idle_band >= 0.0) {
            eyre::bail!("interlock.idle_band must be >= 0.0");
        }
        if il.settle_ms > 10 * 60 * 1000 {
            eyre::bail!("interlock.settle_ms is unreasonably large (>10min)");
        }
        if il.sensors.len() != self.protocol.sensor_channels {
            eyre::bail!(
                "interlock.sensors has {} entries but protocol.sensor_channels is {}",
                il.sensors.len(),
                self.protocol.sensor_channels
            );
        }
        for s in &il.sensors {
            if s.name.trim().is_empty() {
                eyre::bail!("interlock.sensors name must not be empty");
            }
            check_range(
                &format!("interlock.sensors '{}'", s.name),
                [s.min, s.warn_min, s.warn_max, s.max],
            )?;
        }

        // Simulation
        if self.simulation.update_ms == 0 {
            eyre::bail!("simulation.update_ms must be >= 1");
        }
        for (name, v) in [
            ("kp", self.simulation.kp),
            ("ki", self.simulation.ki),
            ("kd", self.simulation.kd),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                eyre::bail!("simulation.{name} must be a finite value >= 0");
            }
        }

        // Schedule
        if !(self.schedule.resolution_s.is_finite() && self.schedule.resolution_s > 0.0) {
            eyre::bail!("schedule.resolution_s must be > 0");
        }
        if !(self.schedule.max_duration_s > 0.0
            && self.schedule.max_duration_s <= MAX_SCHEDULE_SECONDS)
        {
            eyre::bail!("schedule.max_duration_s must be in (0, 3600]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}

/// Parsed schedule file: a time column plus one column per commanded channel.
///
/// Expected layout:
/// time_s,H2,O2
/// 0,0,0
/// 5,5,10
/// 10,10,5
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCsv {
    /// Header names, time first.
    pub headers: Vec<String>,
    pub time: Vec<f64>,
    /// Column-major channel values; `columns[c][row]`.
    pub columns: Vec<Vec<f64>>,
}

impl ScheduleCsv {
    pub fn rows(&self) -> usize {
        self.time.len()
    }

    pub fn channel_names(&self) -> &[String] {
        self.headers.get(1..).unwrap_or(&[])
    }
}

fn parse_cell(cell: &str, row: usize, header: &str) -> eyre::Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        eyre::bail!("schedule row {row} has an empty cell in column '{header}'");
    }
    let v: f64 = cell
        .parse()
        .map_err(|_| eyre::eyre!("schedule row {row} column '{header}' is not numeric: {cell:?}"))?;
    if !v.is_finite() {
        eyre::bail!("schedule row {row} column '{header}' is not finite");
    }
    Ok(v)
}

/// Parse and validate a schedule from any reader.
pub fn parse_schedule_csv<R: Read>(reader: R, max_duration_s: f64) -> eyre::Result<ScheduleCsv> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read schedule headers: {e}"))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.len() < 2 {
        eyre::bail!(
            "schedule needs a time column and at least one channel column, got: {}",
            headers.join(",")
        );
    }
    if headers.iter().any(String::is_empty) {
        eyre::bail!("schedule headers must not be empty");
    }

    let mut time = Vec::new();
    let mut columns = vec![Vec::new(); headers.len() - 1];
    for (idx, rec) in rdr.records().enumerate() {
        // header is line 1
        let row = idx + 2;
        let rec = rec.map_err(|e| eyre::eyre!("invalid schedule row {row}: {e}"))?;
        if rec.len() != headers.len() {
            eyre::bail!(
                "schedule row {row} has {} cells, expected {}",
                rec.len(),
                headers.len()
            );
        }
        let t = parse_cell(&rec[0], row, &headers[0])?;
        if t < 0.0 {
            eyre::bail!("schedule row {row} time must be >= 0");
        }
        if let Some(&prev) = time.last()
            && t <= prev
        {
            eyre::bail!("schedule time values must be strictly increasing (row {row})");
        }
        if t > max_duration_s {
            eyre::bail!("schedule time {t} at row {row} exceeds {max_duration_s} seconds");
        }
        time.push(t);
        for (c, col) in columns.iter_mut().enumerate() {
            col.push(parse_cell(&rec[c + 1], row, &headers[c + 1])?);
        }
    }

    Ok(ScheduleCsv {
        headers,
        time,
        columns,
    })
}

pub fn load_schedule_csv(path: &Path, max_duration_s: f64) -> eyre::Result<ScheduleCsv> {
    let file = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;
    parse_schedule_csv(file, max_duration_s)
        .map_err(|e| eyre::eyre!("schedule CSV {:?}: {}", path, e))
}
