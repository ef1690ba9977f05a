#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Gas mixing rig control core (hardware-agnostic).
//!
//! All rig I/O goes through the `mixer_traits::LinkBackend` and
//! `mixer_traits::Transport` traits, so the same core drives a serial
//! microcontroller or the simulated plant.
//!
//! ## Architecture
//!
//! - **Device link**: port discovery, setpoint/telemetry framing, staleness (`link`)
//! - **History**: timestamped setpoints, responses, valve and sensor records (`history`)
//! - **Interlock**: typed range and binary checks over the latest history (`interlock`)
//! - **Control**: the operating state machine and its loop thread (`control`)
//! - **Schedules**: validated, resampled flow tables for playback (`schedule`)
//!
//! Every violation forces `OperatingState::EmergencyStop`, which commands zero
//! flow with the valve closed before the state change is published.

pub mod config;
pub mod control;
pub mod conversions;
pub mod error;
pub mod history;
pub mod hw_error;
pub mod interlock;
pub mod link;
pub mod mocks;
pub mod observer;
pub mod protocol;
pub mod schedule;
pub mod state;

pub use config::{ControlCfg, FrameLayout, InterlockCfg, LinkCfg, RangeLimits, SensorLimit};
pub use control::{ControlSystem, ControlSystemBuilder, ScheduleProgress};
pub use error::{BuildError, MixerError, Result};
pub use history::{HistoryLog, SharedHistory, Stamped};
pub use interlock::{InterlockMonitor, InterlockReport, InterlockTest, Violation, ViolationKind};
pub use link::{DeviceLink, ReadOutcome};
pub use observer::{ChannelObserver, Event, NullObserver, Observer};
pub use protocol::{SetpointVector, TelemetryFrame};
pub use schedule::ScheduleTable;
pub use state::{OperatingState, ValveState};
