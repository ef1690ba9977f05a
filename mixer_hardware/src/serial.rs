use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use mixer_traits::{BoxError, LinkBackend, PortInfo, Transport};
use serialport::{SerialPort, SerialPortType};
use tracing::{debug, trace};

use crate::error::HwError;

/// Enumerates and opens OS serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl LinkBackend for SerialBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, BoxError> {
        let ports = serialport::available_ports().map_err(HwError::from)?;
        Ok(ports.into_iter().map(port_info).collect())
    }

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn Transport + Send>, BoxError> {
        let handle = serialport::new(port, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(HwError::from)?;
        debug!(port, baud_rate, "serial port opened");
        Ok(Box::new(SerialTransport::new(handle)))
    }
}

fn port_info(p: serialport::SerialPortInfo) -> PortInfo {
    let (description, hwid) = match p.port_type {
        SerialPortType::UsbPort(info) => {
            let parts: Vec<String> = [info.manufacturer, info.product]
                .into_iter()
                .flatten()
                .collect();
            let description = if parts.is_empty() {
                "n/a".to_string()
            } else {
                parts.join(" ")
            };
            let mut hwid = format!("USB VID:PID={:04X}:{:04X}", info.vid, info.pid);
            if let Some(sn) = info.serial_number {
                hwid.push_str(" SER=");
                hwid.push_str(&sn);
            }
            (description, hwid)
        }
        SerialPortType::BluetoothPort => ("Bluetooth".to_string(), "BLUETOOTH".to_string()),
        SerialPortType::PciPort => ("PCI".to_string(), "PCI".to_string()),
        SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
    };
    PortInfo {
        name: p.port_name,
        description,
        hwid,
    }
}

/// Buffered line reader/writer over an open serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    buf: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            buf: Vec::with_capacity(256),
        }
    }
}

/// Remove and return the first complete line in `buf`, if any.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        self.port.write_all(line.as_bytes()).map_err(HwError::from)?;
        self.port.flush().map_err(HwError::from)?;
        trace!(line = line.trim_end(), "serial tx");
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, BoxError> {
        let waiting = self.port.bytes_to_read().map_err(HwError::from)?;
        Ok(self.buf.len() + waiting as usize)
    }

    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = take_line(&mut self.buf) {
                trace!(line = %line, "serial rx");
                return Ok(Some(line));
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(Box::new(HwError::Io(e))),
            }
        }
    }
}
