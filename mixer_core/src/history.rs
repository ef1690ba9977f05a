//! Timestamped, append-only records of everything sent to and heard from the rig.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::protocol::{SetpointVector, TelemetryFrame};

/// A value tagged with milliseconds since the link epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub t_ms: u64,
    pub value: T,
}

#[derive(Debug, Default, Clone)]
pub struct HistoryLog {
    setpoints: Vec<Stamped<SetpointVector>>,
    responses: Vec<Stamped<Vec<f64>>>,
    valves: Vec<Stamped<u8>>,
    sensors: Vec<Stamped<Vec<f64>>>,
}

/// History shared between the control loop and observers.
pub type SharedHistory = Arc<RwLock<HistoryLog>>;

pub fn shared() -> SharedHistory {
    Arc::new(RwLock::new(HistoryLog::default()))
}

/// Read access that survives a panicked writer.
pub fn read(h: &SharedHistory) -> RwLockReadGuard<'_, HistoryLog> {
    h.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(h: &SharedHistory) -> RwLockWriteGuard<'_, HistoryLog> {
    h.write().unwrap_or_else(PoisonError::into_inner)
}

fn push<T>(seq: &mut Vec<Stamped<T>>, t_ms: u64, value: T) {
    // timestamps never go backwards within a sequence
    let t_ms = seq.last().map_or(t_ms, |last| t_ms.max(last.t_ms));
    seq.push(Stamped { t_ms, value });
}

fn since<T>(seq: &[Stamped<T>], from_ms: u64) -> &[Stamped<T>] {
    let start = seq.partition_point(|s| s.t_ms < from_ms);
    &seq[start..]
}

impl HistoryLog {
    pub fn record_setpoint(&mut self, t_ms: u64, v: SetpointVector) {
        push(&mut self.setpoints, t_ms, v);
    }

    /// Append responses, valve state and sensors under one timestamp.
    pub fn record_telemetry(&mut self, t_ms: u64, frame: &TelemetryFrame) {
        push(&mut self.responses, t_ms, frame.mfc_responses.clone());
        push(&mut self.valves, t_ms, frame.valve);
        push(&mut self.sensors, t_ms, frame.sensor_readings.clone());
    }

    pub fn setpoints(&self) -> &[Stamped<SetpointVector>] {
        &self.setpoints
    }
    pub fn responses(&self) -> &[Stamped<Vec<f64>>] {
        &self.responses
    }
    pub fn valves(&self) -> &[Stamped<u8>] {
        &self.valves
    }
    pub fn sensors(&self) -> &[Stamped<Vec<f64>>] {
        &self.sensors
    }

    pub fn latest_setpoint(&self) -> Option<&Stamped<SetpointVector>> {
        self.setpoints.last()
    }
    pub fn latest_response(&self) -> Option<&Stamped<Vec<f64>>> {
        self.responses.last()
    }
    pub fn latest_valve(&self) -> Option<&Stamped<u8>> {
        self.valves.last()
    }
    pub fn latest_sensors(&self) -> Option<&Stamped<Vec<f64>>> {
        self.sensors.last()
    }

    /// Setpoints stamped at or after `from_ms`.
    pub fn setpoints_since(&self, from_ms: u64) -> &[Stamped<SetpointVector>] {
        since(&self.setpoints, from_ms)
    }
    pub fn responses_since(&self, from_ms: u64) -> &[Stamped<Vec<f64>>] {
        since(&self.responses, from_ms)
    }
    pub fn sensors_since(&self, from_ms: u64) -> &[Stamped<Vec<f64>>] {
        since(&self.sensors, from_ms)
    }

    /// Lengths of the four sequences, in declaration order.
    pub fn lens(&self) -> [usize; 4] {
        [
            self.setpoints.len(),
            self.responses.len(),
            self.valves.len(),
            self.sensors.len(),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.lens().iter().all(|n| *n == 0)
    }
}
