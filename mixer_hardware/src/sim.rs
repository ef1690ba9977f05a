//! Process plant model used when no physical rig is attached.
//!
//! Each simulated MFC owns one worker thread that advances a PID loop on a
//! first-order response at a fixed period. `SimulatedRig` wraps a set of them
//! behind the same line protocol the real microcontroller speaks, so the
//! control core cannot tell the two apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mixer_traits::clock::Clock;
use mixer_traits::{BoxError, LinkBackend, PortInfo, Transport, wire};

use crate::error::HwError;

/// Amplitude of the deterministic oscillation added each update.
pub const PERTURBATION_AMPLITUDE: f64 = 0.001;
/// Atmospheric pressure baseline for synthetic pressure sensors (psi).
const ATMOSPHERE_PSI: f64 = 14.7;
/// Ambient line temperature for the synthetic temperature sensor (C).
const AMBIENT_C: f64 = 20.0;

/// PID gains and update period for one simulated channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub update: Duration,
}

impl Default for PlantGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            update: Duration::from_millis(50),
        }
    }
}

/// PID controller driving a first-order response.
#[derive(Debug, Clone)]
pub struct PidPlant {
    gains: PlantGains,
    target: f64,
    value: f64,
    integral: f64,
    prev_error: f64,
}

impl PidPlant {
    pub fn new(gains: PlantGains) -> Self {
        Self {
            gains,
            target: 0.0,
            value: 0.0,
            integral: 0.0,
            prev_error: 0.0,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advance by `dt` seconds; `t` is the elapsed time used for the
    /// oscillatory perturbation.
    pub fn step(&mut self, dt: f64, t: f64) -> f64 {
        if dt.is_nan() || dt <= 0.0 {
            return self.value;
        }
        let error = self.target - self.value;
        self.integral += error * dt;
        let derivative = (error - self.prev_error) / dt;
        let control =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        self.value += control * dt;
        self.prev_error = error;
        self.value += (t * 2.0).sin() * PERTURBATION_AMPLITUDE;
        self.value
    }
}

/// One simulated mass-flow controller with its own update thread.
pub struct SimulatedMfc {
    plant: Arc<Mutex<PidPlant>>,
    running: Arc<AtomicBool>,
    clock: Arc<dyn Clock + Send + Sync>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl core::fmt::Debug for SimulatedMfc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedMfc")
            .field("target", &self.target())
            .field("value", &self.current_value())
            .field("running", &self.is_running())
            .finish()
    }
}

impl SimulatedMfc {
    /// Create a stopped channel. Call `start()` to begin updates.
    pub fn new(gains: PlantGains, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            plant: Arc::new(Mutex::new(PidPlant::new(gains))),
            running: Arc::new(AtomicBool::new(false)),
            clock,
            join_handle: None,
        }
    }

    /// Spawn the update thread. No-op when already running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let plant = Arc::clone(&self.plant);
        let running = Arc::clone(&self.running);
        let clock = Arc::clone(&self.clock);
        let period = plant
            .lock()
            .map(|p| p.gains.update)
            .unwrap_or(Duration::from_millis(50));

        self.join_handle = Some(std::thread::spawn(move || {
            let epoch = clock.now();
            let dt = period.as_secs_f64();
            while running.load(Ordering::Relaxed) {
                let t = clock.secs_since(epoch);
                plant
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .step(dt, t);
                // Paced in wall time so a manual clock does not spin the worker.
                std::thread::sleep(period);
            }
            tracing::trace!("simulated MFC thread exiting");
        }));
    }

    /// Stop and join the update thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("simulated MFC thread panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_target(&self, value: f64) {
        self.plant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_target(value);
    }

    pub fn target(&self) -> f64 {
        self.plant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target()
    }

    pub fn current_value(&self) -> f64 {
        self.plant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value()
    }
}

impl Drop for SimulatedMfc {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Simulated rig microcontroller: MFC channels, a valve and synthetic sensors.
///
/// Accepts `state,valve,mfc1..mfcN` command lines and streams
/// `sequence,state,valve,mfc1..mfcN,sensor1..sensorM` telemetry lines with a
/// fresh sequence number on every read.
pub struct SimulatedRig {
    mfcs: Vec<SimulatedMfc>,
    sensor_count: usize,
    state: u64,
    valve: u64,
    sequence: u64,
    pending: Option<String>,
}

impl SimulatedRig {
    /// Build and start `mfc_count` channels.
    pub fn new(
        mfc_count: usize,
        sensor_count: usize,
        gains: PlantGains,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let mfcs = (0..mfc_count)
            .map(|_| {
                let mut mfc = SimulatedMfc::new(gains, Arc::clone(&clock));
                mfc.start();
                mfc
            })
            .collect();
        Self {
            mfcs,
            sensor_count,
            state: 1,
            valve: 0,
            sequence: 0,
            pending: None,
        }
    }

    pub fn mfcs(&self) -> &[SimulatedMfc] {
        &self.mfcs
    }

    fn apply_command(&mut self, line: &str) -> Result<(), HwError> {
        let fields = wire::split_line(line);
        let expected = 2 + self.mfcs.len();
        if fields.len() != expected {
            return Err(HwError::InvalidCommand(format!(
                "expected {expected} fields, got {}",
                fields.len()
            )));
        }
        let state = wire::parse_uint(fields[0])
            .ok_or_else(|| HwError::InvalidCommand(format!("bad state field {:?}", fields[0])))?;
        let valve = wire::parse_uint(fields[1])
            .ok_or_else(|| HwError::InvalidCommand(format!("bad valve field {:?}", fields[1])))?;
        let flows = fields[2..]
            .iter()
            .map(|f| wire::parse_float(f))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| HwError::InvalidCommand("non-numeric flow field".into()))?;

        self.state = state;
        self.valve = valve;
        for (mfc, flow) in self.mfcs.iter().zip(flows) {
            mfc.set_target(flow);
        }
        Ok(())
    }

    fn sensor_readings(&self, total_flow: f64) -> Vec<f64> {
        (0..self.sensor_count)
            .map(|i| match i % 4 {
                0 => ATMOSPHERE_PSI + 1.5 * total_flow,
                1 => ATMOSPHERE_PSI + 1.0 * total_flow,
                2 => ATMOSPHERE_PSI + 2.0 * total_flow,
                _ => AMBIENT_C + 0.05 * total_flow,
            })
            .collect()
    }

    fn telemetry_line(&mut self) -> String {
        self.sequence += 1;
        let values: Vec<f64> = self.mfcs.iter().map(SimulatedMfc::current_value).collect();
        let total_flow: f64 = values.iter().map(|v| v.max(0.0)).sum();
        let mut fields = vec![
            self.sequence.to_string(),
            self.state.to_string(),
            self.valve.to_string(),
        ];
        fields.extend(values.iter().map(|v| wire::format_float(*v)));
        fields.extend(
            self.sensor_readings(total_flow)
                .into_iter()
                .map(wire::format_float),
        );
        wire::join_line(fields)
    }
}

impl Transport for SimulatedRig {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        self.apply_command(line)?;
        tracing::trace!(line = line.trim_end(), "sim rx command");
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, BoxError> {
        if self.pending.is_none() {
            self.pending = Some(self.telemetry_line());
        }
        Ok(self.pending.as_ref().map_or(0, String::len))
    }

    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        let line = match self.pending.take() {
            Some(line) => line,
            None => self.telemetry_line(),
        };
        Ok(Some(line.trim_end().to_string()))
    }
}

/// Backend that opens a `SimulatedRig` on any port name.
#[derive(Clone)]
pub struct SimulatedBackend {
    mfc_count: usize,
    sensor_count: usize,
    gains: PlantGains,
    clock: Arc<dyn Clock + Send + Sync>,
}

/// Name of the single port the simulated backend reports.
pub const SIM_PORT_NAME: &str = "sim0";

impl SimulatedBackend {
    pub fn new(
        mfc_count: usize,
        sensor_count: usize,
        gains: PlantGains,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            mfc_count,
            sensor_count,
            gains,
            clock,
        }
    }
}

impl LinkBackend for SimulatedBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, BoxError> {
        Ok(vec![PortInfo {
            name: SIM_PORT_NAME.to_string(),
            description: "Simulated Arduino Mega gas rig".to_string(),
            hwid: "SIM VID:PID=0000:0000".to_string(),
        }])
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn Transport + Send>, BoxError> {
        tracing::debug!(port, channels = self.mfc_count, "opening simulated rig");
        Ok(Box::new(SimulatedRig::new(
            self.mfc_count,
            self.sensor_count,
            self.gains,
            Arc::clone(&self.clock),
        )))
    }
}
