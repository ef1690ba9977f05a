#![no_main]
use libfuzzer_sys::fuzz_target;
use mixer_core::ScheduleTable;

fuzz_target!(|data: &[u8]| {
    let Ok(csv) = mixer_config::parse_schedule_csv(data, 3600.0) else {
        return;
    };
    if let Ok(table) = ScheduleTable::try_from(&csv) {
        let _ = table.resample(0.1);
    }
});
