//! Test and helper mocks for mixer_core.
//!
//! These stand in for the rig so the link and controller can be driven
//! deterministically, together with `mixer_traits::ManualClock`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mixer_traits::{BoxError, LinkBackend, PortInfo, Transport, wire};

use crate::config::FrameLayout;
use crate::observer::{Event, Observer};
use crate::state::OperatingState;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared log of every line a mock transport was asked to write.
pub type WriteLog = Arc<Mutex<Vec<String>>>;

/// Ideal rig: echoes the last command back as telemetry.
///
/// Responses equal the commanded flows times `response_gain`; the valve and
/// state follow the command. With `fresh` set every read carries a new
/// sequence number, otherwise the sequence never changes.
#[derive(Debug)]
pub struct LoopbackTransport {
    layout: FrameLayout,
    sequence: u64,
    fresh: bool,
    response_gain: f64,
    sensors: Vec<f64>,
    state: u64,
    valve: u64,
    flows: Vec<f64>,
    writes: WriteLog,
}

impl LoopbackTransport {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            sequence: 0,
            fresh: true,
            response_gain: 1.0,
            sensors: vec![20.0; layout.sensor_channels],
            state: u64::from(OperatingState::Idle.code()),
            valve: 0,
            flows: vec![0.0; layout.mfc_channels],
            writes: WriteLog::default(),
        }
    }

    /// Repeat the same sequence number on every frame.
    pub fn frozen(mut self) -> Self {
        self.fresh = false;
        self
    }

    pub fn with_response_gain(mut self, gain: f64) -> Self {
        self.response_gain = gain;
        self
    }

    pub fn with_sensors(mut self, sensors: Vec<f64>) -> Self {
        self.sensors = sensors;
        self
    }

    /// Record writes into an existing log shared with the test.
    pub fn with_write_log(mut self, log: WriteLog) -> Self {
        self.writes = log;
        self
    }

    pub fn writes(&self) -> WriteLog {
        Arc::clone(&self.writes)
    }

    fn frame(&mut self) -> String {
        if self.fresh || self.sequence == 0 {
            self.sequence += 1;
        }
        let mut fields = vec![
            self.sequence.to_string(),
            self.state.to_string(),
            self.valve.to_string(),
        ];
        fields.extend(
            self.flows
                .iter()
                .map(|f| wire::format_float(f * self.response_gain)),
        );
        fields.extend(self.sensors.iter().map(|s| wire::format_float(*s)));
        wire::join_line(fields)
    }
}

impl Transport for LoopbackTransport {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        lock(&self.writes).push(line.to_string());
        let fields = wire::split_line(line);
        if fields.len() != self.layout.setpoint_fields() {
            return Err(format!("loopback expected {} fields", self.layout.setpoint_fields()).into());
        }
        self.state = wire::parse_uint(fields[0]).ok_or("bad state")?;
        self.valve = wire::parse_uint(fields[1]).ok_or("bad valve")?;
        self.flows = fields[2..]
            .iter()
            .map(|f| wire::parse_float(f).ok_or("bad flow"))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, BoxError> {
        Ok(1)
    }

    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        Ok(Some(self.frame().trim_end().to_string()))
    }
}

/// Queue of canned inbound lines plus a record of writes.
#[derive(Debug, Default)]
pub struct Script {
    pub incoming: VecDeque<String>,
    pub writes: Vec<String>,
    pub fail_writes: bool,
    pub fail_reads: bool,
}

/// Transport replaying a `Script`; clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: impl Into<String>) {
        lock(&self.script).incoming.push_back(line.into());
    }

    pub fn writes(&self) -> Vec<String> {
        lock(&self.script).writes.clone()
    }

    pub fn pending_lines(&self) -> usize {
        lock(&self.script).incoming.len()
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.script).fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.script).fail_reads = fail;
    }
}

impl Transport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        let mut s = lock(&self.script);
        if s.fail_writes {
            return Err(Box::new(std::io::Error::other("scripted write failure")));
        }
        s.writes.push(line.to_string());
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, BoxError> {
        let s = lock(&self.script);
        if s.fail_reads {
            return Err(Box::new(std::io::Error::other("scripted read failure")));
        }
        Ok(s.incoming.front().map_or(0, |l| l.len() + 1))
    }

    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        Ok(lock(&self.script).incoming.pop_front())
    }
}

type TransportFactory = dyn Fn() -> Box<dyn Transport + Send> + Send + Sync;

/// Backend with a fixed port list whose `open` calls a factory.
pub struct MockBackend {
    ports: Vec<PortInfo>,
    factory: Box<TransportFactory>,
    opens: Arc<AtomicUsize>,
    fail_open: bool,
}

impl core::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockBackend")
            .field("ports", &self.ports)
            .field("opens", &self.opens.load(Ordering::Relaxed))
            .field("fail_open", &self.fail_open)
            .finish()
    }
}

impl MockBackend {
    pub fn new<F>(ports: Vec<PortInfo>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Transport + Send> + Send + Sync + 'static,
    {
        Self {
            ports,
            factory: Box::new(factory),
            opens: Arc::new(AtomicUsize::new(0)),
            fail_open: false,
        }
    }

    /// One Arduino-looking port backed by a shared scripted transport.
    pub fn scripted(transport: ScriptedTransport) -> Self {
        Self::new(vec![arduino_port("/dev/ttyACM0")], move || {
            Box::new(transport.clone())
        })
    }

    /// One Arduino-looking port backed by a fresh loopback per open.
    pub fn loopback(layout: FrameLayout) -> Self {
        Self::new(vec![arduino_port("/dev/ttyACM0")], move || {
            Box::new(LoopbackTransport::new(layout))
        })
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Counter of successful `open` calls.
    pub fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

pub fn arduino_port(name: &str) -> PortInfo {
    PortInfo {
        name: name.to_string(),
        description: "Arduino Mega 2560".to_string(),
        hwid: "USB VID:PID=2341:0042".to_string(),
    }
}

impl LinkBackend for MockBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, BoxError> {
        Ok(self.ports.clone())
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn Transport + Send>, BoxError> {
        if self.fail_open {
            return Err(format!("could not open {port}").into());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((self.factory)())
    }
}

/// Observer that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Target state of every recorded transition, in order.
    pub fn states(&self) -> Vec<OperatingState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn on_state_change(&self, from: OperatingState, to: OperatingState) {
        lock(&self.events).push(Event::StateChanged { from, to });
    }

    fn on_log(&self, message: &str) {
        lock(&self.events).push(Event::Log(message.to_string()));
    }

    fn on_indicator(&self, name: &str, value: &str) {
        lock(&self.events).push(Event::Indicator {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
}
