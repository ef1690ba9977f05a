#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Concrete link backends for the gas-mixing rig.
//!
//! - `serial` (feature `hardware`): serialport-backed transport to the rig
//!   microcontroller.
//! - `sim`: per-channel PID plant models and a simulated microcontroller that
//!   speaks the same line protocol, used when no physical rig is attached.

pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;

#[cfg(feature = "hardware")]
pub use serial::{SerialBackend, SerialTransport};
pub use sim::{PidPlant, PlantGains, SimulatedBackend, SimulatedMfc, SimulatedRig};
