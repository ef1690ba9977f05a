//! Runtime configuration types for the control core.
//!
//! These are the structs the link, interlock and controller consume.
//! They are separate from the TOML-deserialized config in `mixer_config`.

use std::time::Duration;

/// Serial link parameters and health thresholds.
#[derive(Debug, Clone)]
pub struct LinkCfg {
    /// Fixed port; when `None` the link discovers one by keyword.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Per-read timeout handed to the transport.
    pub read_timeout: Duration,
    /// Wait after opening while the controller board resets.
    pub reset_delay: Duration,
    /// Wait between a setpoint write and the follow-up telemetry read.
    pub response_delay: Duration,
    /// Lower-case substrings matched against port description and hwid.
    pub keywords: Vec<String>,
    /// Unchanged-sequence reads tolerated before the link is unhealthy.
    pub stale_limit: u32,
    /// Longest gap without a fresh frame before the link is unhealthy.
    /// `Duration::ZERO` disables the check.
    pub max_silence: Duration,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
            reset_delay: Duration::from_secs(2),
            response_delay: Duration::from_millis(250),
            keywords: ["arduino", "ch340", "usb serial", "mega", "uno", "nano", "leonardo"]
                .into_iter()
                .map(String::from)
                .collect(),
            stale_limit: 5,
            max_silence: Duration::from_secs(2),
        }
    }
}

/// Channel counts of the rig; fixes the field count of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub mfc_channels: usize,
    pub sensor_channels: usize,
}

impl FrameLayout {
    pub const fn new(mfc_channels: usize, sensor_channels: usize) -> Self {
        Self {
            mfc_channels,
            sensor_channels,
        }
    }

    /// Fields in an outbound setpoint line.
    pub const fn setpoint_fields(&self) -> usize {
        2 + self.mfc_channels
    }

    /// Fields in an inbound telemetry line.
    pub const fn telemetry_fields(&self) -> usize {
        3 + self.mfc_channels + self.sensor_channels
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::new(5, 4)
    }
}

/// Control loop timing.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Loop period.
    pub resolution: Duration,
    /// Bound on waiting for the loop thread when stopping.
    pub join_timeout: Duration,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            resolution: Duration::from_millis(200),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Four-threshold band used by every range test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeLimits {
    pub min: f64,
    pub warn_min: f64,
    pub warn_max: f64,
    pub max: f64,
}

impl RangeLimits {
    pub const fn new(min: f64, warn_min: f64, warn_max: f64, max: f64) -> Self {
        Self {
            min,
            warn_min,
            warn_max,
            max,
        }
    }
}

/// Named limits for one sensor channel, in frame order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLimit {
    pub name: String,
    pub limits: RangeLimits,
}

impl SensorLimit {
    pub fn new(name: impl Into<String>, limits: RangeLimits) -> Self {
        Self {
            name: name.into(),
            limits,
        }
    }
}

/// Interlock thresholds.
#[derive(Debug, Clone)]
pub struct InterlockCfg {
    /// Limits on every commanded flow.
    pub setpoint: RangeLimits,
    /// Response/setpoint ratio that warns.
    pub response_warn_ratio: f64,
    /// Response/setpoint ratio that trips.
    pub response_max_ratio: f64,
    pub error_warn_ratio: f64,
    pub error_max_ratio: f64,
    /// A channel must hold its setpoint this long before its relative error
    /// is checked. The response ceiling applies every cycle regardless.
    pub settle: Duration,
    /// Setpoints within this band of zero have no relative error test and an
    /// absolute response ceiling of the ratios times the band. Readings down
    /// to minus the band count as zero flow.
    pub idle_band: f64,
    pub sensors: Vec<SensorLimit>,
}

impl Default for InterlockCfg {
    fn default() -> Self {
        let pressure = RangeLimits::new(0.0, 0.0, 135.0, 150.0);
        Self {
            setpoint: RangeLimits::new(0.0, 0.0, 9.0, 10.0),
            response_warn_ratio: 1.1,
            response_max_ratio: 1.2,
            error_warn_ratio: 0.1,
            error_max_ratio: 0.2,
            settle: Duration::from_secs(5),
            idle_band: 0.05,
            sensors: vec![
                SensorLimit::new("Mixing Chamber Pressure", pressure),
                SensorLimit::new("Nozzle Pressure", pressure),
                SensorLimit::new("Line Pressure", pressure),
                SensorLimit::new("Line Temperature", RangeLimits::new(0.0, 5.0, 60.0, 80.0)),
            ],
        }
    }
}
