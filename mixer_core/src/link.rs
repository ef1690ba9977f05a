//! Device link: owns the connection to the rig microcontroller.
//!
//! Discovery, connect/disconnect, setpoint encoding and telemetry decoding all
//! live here. Every sent vector and every fresh frame lands in the shared
//! `HistoryLog`; repeated sequence numbers feed a staleness counter that the
//! interlock reads through `is_healthy()`.

use std::sync::Arc;
use std::time::Instant;

use mixer_traits::clock::Clock;
use mixer_traits::{LinkBackend, Transport};
use tracing::{debug, info, trace, warn};

use crate::config::{FrameLayout, LinkCfg};
use crate::error::MixerError;
use crate::history::{self, SharedHistory};
use crate::hw_error::map_hw_error;
use crate::protocol::{SetpointVector, TelemetryFrame};

/// What a single `read_telemetry` call found.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Not connected, or nothing waiting on the line.
    Idle,
    /// A line arrived but did not decode; history is untouched.
    Dropped,
    /// A valid frame repeating the previous sequence number.
    Stale(u64),
    /// A new frame, now recorded in history.
    Fresh(TelemetryFrame),
}

pub struct DeviceLink {
    backend: Box<dyn LinkBackend + Send>,
    transport: Option<Box<dyn Transport + Send>>,
    port: Option<String>,
    history: SharedHistory,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    cfg: LinkCfg,
    layout: FrameLayout,
    last_sequence: Option<u64>,
    stale_count: u32,
    last_fresh_ms: u64,
}

impl core::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .field("layout", &self.layout)
            .field("last_sequence", &self.last_sequence)
            .field("stale_count", &self.stale_count)
            .finish()
    }
}

impl DeviceLink {
    pub fn new(
        backend: Box<dyn LinkBackend + Send>,
        cfg: LinkCfg,
        layout: FrameLayout,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            backend,
            transport: None,
            port: None,
            history: history::shared(),
            clock,
            epoch,
            cfg,
            layout,
            last_sequence: None,
            stale_count: 0,
            last_fresh_ms: 0,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn cfg(&self) -> &LinkCfg {
        &self.cfg
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        Arc::clone(&self.clock)
    }

    /// Milliseconds since this link was created; the history time base.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Port currently open, if any.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// First port whose description or hardware id contains a keyword.
    pub fn discover_port(&self) -> Option<String> {
        let ports = match self.backend.list_ports() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "listing serial ports failed");
                return None;
            }
        };
        if ports.is_empty() {
            info!("no serial ports found");
            return None;
        }
        let found = ports.into_iter().find(|p| {
            let desc = p.description.to_lowercase();
            let hwid = p.hwid.to_lowercase();
            self.cfg.keywords.iter().any(|k| {
                let k = k.to_lowercase();
                !k.is_empty() && (desc.contains(&k) || hwid.contains(&k))
            })
        });
        match &found {
            Some(p) => info!(port = %p.name, description = %p.description, "detected controller-like device"),
            None => info!("no controller detected on available ports"),
        }
        found.map(|p| p.name)
    }

    pub fn connect(&mut self) -> Result<(), MixerError> {
        if self.transport.is_some() {
            debug!(port = ?self.port, "already connected");
            return Ok(());
        }
        let port = match self.cfg.port.clone() {
            Some(p) => p,
            None => self.discover_port().ok_or(MixerError::PortNotFound)?,
        };
        info!(port = %port, baud = self.cfg.baud_rate, "connecting to rig");
        let transport = self
            .backend
            .open(&port, self.cfg.baud_rate, self.cfg.read_timeout)
            .map_err(|e| {
                let err = map_hw_error(e.as_ref());
                warn!(port = %port, error = %err, "connect failed");
                err
            })?;
        // controller boards reset when the port opens
        self.clock.sleep(self.cfg.reset_delay);

        self.transport = Some(transport);
        self.port = Some(port.clone());
        self.last_sequence = None;
        self.stale_count = 0;
        self.last_fresh_ms = self.now_ms();
        info!(port = %port, "connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!(port = ?self.port, "disconnected");
        }
        self.port = None;
    }

    fn drop_connection(&mut self, err: &MixerError) {
        warn!(port = ?self.port, error = %err, "link lost");
        self.transport = None;
        self.port = None;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn stale_count(&self) -> u32 {
        self.stale_count
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Connected, not stale past the limit, and not silent too long.
    pub fn is_healthy(&self) -> bool {
        if !self.is_connected() || self.stale_count > self.cfg.stale_limit {
            return false;
        }
        let limit = self.cfg.max_silence.as_millis();
        limit == 0 || u128::from(self.now_ms().saturating_sub(self.last_fresh_ms)) <= limit
    }

    /// Write one setpoint vector, record it, then give the rig time to answer.
    pub fn send_setpoints(&mut self, v: &SetpointVector) -> Result<(), MixerError> {
        self.write_setpoints(v)?;
        self.clock.sleep(self.cfg.response_delay);
        // read failures are logged and reflected in link health
        let _ = self.read_telemetry();
        Ok(())
    }

    /// Write and record one setpoint vector without waiting for a reply.
    pub fn write_setpoints(&mut self, v: &SetpointVector) -> Result<(), MixerError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(MixerError::NotConnected);
        };
        v.check(&self.layout)?;
        let line = v.encode();
        if let Err(e) = transport.write_line(&line) {
            let err = map_hw_error(e.as_ref());
            self.drop_connection(&err);
            return Err(err);
        }
        trace!(line = line.trim_end(), "sent setpoints");
        let now = self.now_ms();
        history::write(&self.history).record_setpoint(now, v.clone());
        Ok(())
    }

    /// Read at most one line without blocking on an empty buffer.
    pub fn read_telemetry(&mut self) -> Result<ReadOutcome, MixerError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(ReadOutcome::Idle);
        };
        let pending = transport.bytes_pending().and_then(|n| {
            if n == 0 {
                Ok(None)
            } else {
                transport.read_line()
            }
        });
        let line = match pending {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(ReadOutcome::Idle),
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                self.drop_connection(&err);
                return Err(err);
            }
        };

        let frame = match TelemetryFrame::decode(&line, &self.layout) {
            Ok(f) => f,
            Err(e) => {
                debug!(line = %line, error = %e, "dropping malformed frame");
                return Ok(ReadOutcome::Dropped);
            }
        };

        if self.last_sequence == Some(frame.sequence) {
            self.stale_count = self.stale_count.saturating_add(1);
            debug!(
                sequence = frame.sequence,
                stale = self.stale_count,
                "telemetry sequence unchanged"
            );
            return Ok(ReadOutcome::Stale(frame.sequence));
        }

        let now = self.now_ms();
        self.last_sequence = Some(frame.sequence);
        self.stale_count = 0;
        self.last_fresh_ms = now;
        history::write(&self.history).record_telemetry(now, &frame);
        trace!(sequence = frame.sequence, "telemetry recorded");
        Ok(ReadOutcome::Fresh(frame))
    }
}
