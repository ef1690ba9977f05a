use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MixerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for the rig")]
    Timeout,
    #[error("device link is not connected")]
    NotConnected,
    #[error("no serial port matched the discovery keywords")]
    PortNotFound,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("interlock tripped: {0}")]
    Interlock(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing device link")]
    MissingLink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
