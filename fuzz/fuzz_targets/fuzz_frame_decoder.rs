#![no_main]
use libfuzzer_sys::fuzz_target;
use mixer_core::{FrameLayout, TelemetryFrame};

fuzz_target!(|data: &str| {
    let layout = FrameLayout::default();
    if let Ok(frame) = TelemetryFrame::decode(data, &layout) {
        assert_eq!(frame.mfc_responses.len(), layout.mfc_channels);
        assert_eq!(frame.sensor_readings.len(), layout.sensor_channels);
        assert!(frame.mfc_responses.iter().all(|v| v.is_finite()));
        assert!(frame.sensor_readings.iter().all(|v| v.is_finite()));
    }
});
