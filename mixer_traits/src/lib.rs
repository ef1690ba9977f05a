pub mod clock;
pub mod wire;

use std::time::Duration;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Error type used at every trait boundary in the stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One enumerated serial port as reported by the operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// OS device name, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// Human-readable description (manufacturer and product when known).
    pub description: String,
    /// Hardware identifier, e.g. `USB VID:PID=2341:0042 SER=7543`.
    pub hwid: String,
}

/// Line-oriented byte link to the rig microcontroller.
pub trait Transport {
    /// Write one already-terminated line.
    fn write_line(&mut self, line: &str) -> Result<(), BoxError>;
    /// Number of bytes waiting to be read; 0 means a read would find nothing.
    fn bytes_pending(&mut self) -> Result<usize, BoxError>;
    /// Read one line without its terminator. `Ok(None)` when no complete line
    /// arrived within the transport's read timeout.
    fn read_line(&mut self) -> Result<Option<String>, BoxError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        (**self).write_line(line)
    }
    fn bytes_pending(&mut self) -> Result<usize, BoxError> {
        (**self).bytes_pending()
    }
    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        (**self).read_line()
    }
}

/// Opens transports. Implemented by the serial backend and the simulator.
pub trait LinkBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, BoxError>;
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn Transport + Send>, BoxError>;
}
