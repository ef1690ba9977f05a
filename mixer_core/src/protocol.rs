//! Outbound setpoint lines and inbound telemetry frames.
//!
//! Outbound: `state,valve,mfc1..mfcN\n`.
//! Inbound:  `sequence,state,valve,mfc1..mfcN,sensor1..sensorM`.
//! Field counts come from `FrameLayout`; anything else is a protocol error
//! and the whole frame is discarded.

use mixer_traits::wire;

use crate::config::FrameLayout;
use crate::error::MixerError;
use crate::state::{OperatingState, ValveState};

/// One command to the rig.
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointVector {
    pub state: OperatingState,
    pub valve: ValveState,
    pub flows: Vec<f64>,
}

impl SetpointVector {
    pub fn new(state: OperatingState, valve: ValveState, flows: Vec<f64>) -> Self {
        Self {
            state,
            valve,
            flows,
        }
    }

    /// Valve closed, every channel at zero.
    pub fn zeros(state: OperatingState, channels: usize) -> Self {
        Self::new(state, ValveState::Closed, vec![0.0; channels])
    }

    pub fn is_all_zero(&self) -> bool {
        !self.valve.is_open() && self.flows.iter().all(|f| *f == 0.0)
    }

    /// Check the vector against the layout before anything is written.
    pub fn check(&self, layout: &FrameLayout) -> Result<(), MixerError> {
        if self.flows.len() != layout.mfc_channels {
            return Err(MixerError::Protocol(format!(
                "setpoint has {} flows, rig has {} MFC channels",
                self.flows.len(),
                layout.mfc_channels
            )));
        }
        if let Some(bad) = self.flows.iter().find(|f| !f.is_finite()) {
            return Err(MixerError::Protocol(format!("non-finite flow {bad}")));
        }
        Ok(())
    }

    /// Terminated wire line.
    ///
    /// Stop and standby vectors go out as bare integers (`0,0,0,...`), the
    /// form the firmware has always received for them.
    pub fn encode(&self) -> String {
        let head = [
            self.state.code().to_string(),
            self.valve.code().to_string(),
        ];
        let zeros = self.is_all_zero();
        wire::join_line(head.into_iter().chain(self.flows.iter().map(|f| {
            if zeros {
                "0".to_string()
            } else {
                wire::format_float(*f)
            }
        })))
    }
}

/// One decoded status line from the rig.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub sequence: u64,
    pub state: u8,
    pub valve: u8,
    pub mfc_responses: Vec<f64>,
    pub sensor_readings: Vec<f64>,
}

fn small_uint(field: &str, what: &str) -> Result<u8, MixerError> {
    wire::parse_uint(field)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| MixerError::Protocol(format!("bad {what} field {field:?}")))
}

impl TelemetryFrame {
    pub fn decode(line: &str, layout: &FrameLayout) -> Result<Self, MixerError> {
        let fields = wire::split_line(line);
        let expected = layout.telemetry_fields();
        if fields.len() != expected {
            return Err(MixerError::Protocol(format!(
                "expected {expected} fields, got {}",
                fields.len()
            )));
        }
        let sequence = wire::parse_uint(fields[0])
            .ok_or_else(|| MixerError::Protocol(format!("bad sequence field {:?}", fields[0])))?;
        let state = small_uint(fields[1], "state")?;
        let valve = small_uint(fields[2], "valve")?;

        let values = fields[3..]
            .iter()
            .map(|f| {
                wire::parse_float(f)
                    .ok_or_else(|| MixerError::Protocol(format!("bad numeric field {f:?}")))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let (mfc, sensors) = values.split_at(layout.mfc_channels);

        Ok(Self {
            sequence,
            state,
            valve,
            mfc_responses: mfc.to_vec(),
            sensor_readings: sensors.to_vec(),
        })
    }

    /// Valve position reported by the rig, if it is a known code.
    pub fn valve_state(&self) -> Option<ValveState> {
        ValveState::try_from(self.valve).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_state_valve_then_flows() {
        let v = SetpointVector::new(
            OperatingState::RunManual,
            ValveState::Open,
            vec![5.0, 0.25, 0.0],
        );
        assert_eq!(v.encode(), "3,1,5.0,0.25,0.0\n");
        assert_eq!(
            SetpointVector::zeros(OperatingState::EmergencyStop, 2).encode(),
            "0,0,0,0\n"
        );
    }

    #[test]
    fn standby_vector_is_all_integers() {
        assert_eq!(
            SetpointVector::zeros(OperatingState::Idle, 5).encode(),
            "1,0,0,0,0,0,0\n"
        );
        // an open valve with zero flow is a real command, not a stop
        let open = SetpointVector::new(OperatingState::RunManual, ValveState::Open, vec![0.0]);
        assert_eq!(open.encode(), "3,1,0.0\n");
    }

    #[test]
    fn check_rejects_wrong_channel_count() {
        let layout = FrameLayout::new(3, 0);
        let v = SetpointVector::zeros(OperatingState::Idle, 2);
        assert!(matches!(v.check(&layout), Err(MixerError::Protocol(_))));
        assert!(SetpointVector::zeros(OperatingState::Idle, 3).check(&layout).is_ok());
    }

    #[test]
    fn decodes_default_twelve_field_layout() {
        let line = "42,2,1,1.0,2.0,3.0,4.0,5.0,20.1,19.5,30.0,22.5\r\n";
        let f = TelemetryFrame::decode(line, &FrameLayout::default()).unwrap();
        assert_eq!(f.sequence, 42);
        assert_eq!(f.state, 2);
        assert_eq!(f.valve_state(), Some(ValveState::Open));
        assert_eq!(f.mfc_responses, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(f.sensor_readings, vec![20.1, 19.5, 30.0, 22.5]);
    }

    #[test]
    fn rejects_malformed_frames() {
        let layout = FrameLayout::new(1, 1);
        for line in [
            "",
            "1,1,1,1.0",
            "1,1,1,1.0,2.0,3.0",
            "x,1,1,1.0,2.0",
            "1.5,1,1,1.0,2.0",
            "1,300,1,1.0,2.0",
            "1,1,1,abc,2.0",
            "1,1,1,NaN,2.0",
        ] {
            assert!(TelemetryFrame::decode(line, &layout).is_err(), "{line:?}");
        }
    }
}
