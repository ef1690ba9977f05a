use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use mixer_core::{
    FrameLayout, HistoryLog, InterlockMonitor, OperatingState, SetpointVector, TelemetryFrame,
    ValveState,
};

const LINE: &str = "4182,2,1,5.02,0.248,9.97,1.5,0.0,22.4,21.9,20.7,24.3";

// A few minutes of 5 Hz history at the default layout
fn synth_history(rows: u64) -> HistoryLog {
    let layout = FrameLayout::default();
    let mut h = HistoryLog::default();
    for i in 0..rows {
        let t = i * 200;
        if i % 50 == 0 {
            h.record_setpoint(
                t,
                SetpointVector::new(
                    OperatingState::RunSchedule,
                    ValveState::Open,
                    vec![5.0, 0.25, 8.0, 1.5, 0.0],
                ),
            );
        }
        let mut frame = TelemetryFrame::decode(LINE, &layout).expect("bench frame");
        frame.sequence = i;
        h.record_telemetry(t + 50, &frame);
    }
    h
}

pub fn bench_decode(c: &mut Criterion) {
    let layout = FrameLayout::default();
    c.bench_function("telemetry_decode", |b| {
        b.iter(|| TelemetryFrame::decode(black_box(LINE), &layout))
    });
}

pub fn bench_evaluate(c: &mut Criterion) {
    let monitor = InterlockMonitor::default();
    let history = synth_history(1500);
    let now = 1500 * 200;
    c.bench_function("interlock_evaluate", |b| {
        b.iter(|| {
            monitor.evaluate(
                black_box(&history),
                true,
                OperatingState::RunSchedule,
                black_box(now),
            )
        })
    });
}

pub fn bench_record(c: &mut Criterion) {
    let frame = TelemetryFrame::decode(LINE, &FrameLayout::default()).expect("bench frame");
    c.bench_function("history_record_1000", |b| {
        b.iter_batched(
            HistoryLog::default,
            |mut h| {
                for t in 0..1000 {
                    h.record_telemetry(t, black_box(&frame));
                }
                h
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_decode, bench_evaluate, bench_record);
criterion_main!(benches);
