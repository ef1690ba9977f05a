//! `From` implementations bridging `mixer_config` types to `mixer_core` types.
//!
//! The CLI builds the runtime structs straight from the parsed TOML with these.

use std::time::Duration;

use crate::config::{ControlCfg, FrameLayout, InterlockCfg, LinkCfg, RangeLimits, SensorLimit};

// ── LinkCfg ──────────────────────────────────────────────────────────────────

impl From<&mixer_config::Config> for LinkCfg {
    fn from(c: &mixer_config::Config) -> Self {
        let serial = &c.serial;
        Self {
            port: serial.port.clone(),
            baud_rate: serial.baud_rate,
            read_timeout: Duration::from_millis(serial.timeout_ms),
            reset_delay: Duration::from_millis(serial.reset_delay_ms),
            response_delay: Duration::from_millis(serial.response_delay_ms),
            keywords: serial.keywords.iter().map(|k| k.to_lowercase()).collect(),
            stale_limit: c.protocol.stale_limit,
            max_silence: Duration::from_millis(c.protocol.max_silence_ms),
        }
    }
}

// ── FrameLayout ──────────────────────────────────────────────────────────────

impl From<&mixer_config::ProtocolCfg> for FrameLayout {
    fn from(c: &mixer_config::ProtocolCfg) -> Self {
        Self::new(c.mfc_channels, c.sensor_channels)
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&mixer_config::ControlCfg> for ControlCfg {
    fn from(c: &mixer_config::ControlCfg) -> Self {
        Self {
            resolution: Duration::from_millis(c.resolution_ms),
            join_timeout: Duration::from_millis(c.join_timeout_ms),
        }
    }
}

// ── InterlockCfg ─────────────────────────────────────────────────────────────

impl From<&mixer_config::SensorRange> for SensorLimit {
    fn from(s: &mixer_config::SensorRange) -> Self {
        Self::new(
            s.name.clone(),
            RangeLimits::new(s.min, s.warn_min, s.warn_max, s.max),
        )
    }
}

impl From<&mixer_config::InterlockCfg> for InterlockCfg {
    fn from(c: &mixer_config::InterlockCfg) -> Self {
        Self {
            setpoint: RangeLimits::new(
                c.setpoint_min,
                c.setpoint_warn_min,
                c.setpoint_warn_max,
                c.setpoint_max,
            ),
            response_warn_ratio: c.response_warn_ratio,
            response_max_ratio: c.response_max_ratio,
            error_warn_ratio: c.error_warn_ratio,
            error_max_ratio: c.error_max_ratio,
            settle: Duration::from_millis(c.settle_ms),
            idle_band: c.idle_band,
            sensors: c.sensors.iter().map(SensorLimit::from).collect(),
        }
    }
}
