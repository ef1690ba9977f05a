//! Operating states and valve positions, with their wire codes.

use std::fmt;

use crate::error::MixerError;

/// Mode of the control system. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperatingState {
    EmergencyStop = 0,
    Idle = 1,
    RunSchedule = 2,
    RunManual = 3,
}

impl OperatingState {
    pub const ALL: [Self; 4] = [
        Self::EmergencyStop,
        Self::Idle,
        Self::RunSchedule,
        Self::RunManual,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::EmergencyStop => "Emergency Stop",
            Self::Idle => "Idle",
            Self::RunSchedule => "Run Schedule",
            Self::RunManual => "Run Manual",
        }
    }

    /// States in which gas may flow and the interlock is enforced.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::RunSchedule | Self::RunManual)
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for OperatingState {
    type Error = MixerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| MixerError::State(format!("unknown state code {code}")))
    }
}

/// Position of the main gas valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ValveState {
    #[default]
    Closed = 0,
    Open = 1,
}

impl ValveState {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl From<bool> for ValveState {
    fn from(open: bool) -> Self {
        if open { Self::Open } else { Self::Closed }
    }
}

impl TryFrom<u8> for ValveState {
    type Error = MixerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Closed),
            1 => Ok(Self::Open),
            other => Err(MixerError::Protocol(format!("unknown valve code {other}"))),
        }
    }
}
