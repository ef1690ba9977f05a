use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial error: {0}")]
    Serial(String),
    #[error("serial read timeout")]
    Timeout,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "hardware")]
impl From<serialport::Error> for HwError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => HwError::Timeout,
            _ => HwError::Serial(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
