// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dss_core::{EventKind, EventRecord, EventTable, PredictionStream, RowKey};
use dss_eval::{DEFAULT_TOLERANCES, PredictedEvent, event_detection_ap, extract_events};

const SERIES: usize = 64;
const ROWS: u64 = 8_640;

fn truth() -> EventTable {
    EventTable::new((0..SERIES).flat_map(|s| {
        let id = format!("s{s}");
        [
            EventRecord::new(id.clone(), EventKind::Onset, Some(2_000 + s as u64 * 7)),
            EventRecord::new(id, EventKind::Wakeup, Some(6_000 + s as u64 * 11)),
        ]
    }))
}

fn stream() -> PredictionStream {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    for s in 0..SERIES {
        for step in 0..ROWS {
            let onset = (-((step as f64 - 2_010.0) / 40.0).powi(2)).exp();
            let wakeup = (-((step as f64 - 5_990.0) / 40.0).powi(2)).exp();
            values.extend([onset, wakeup]);
            keys.push(RowKey {
                series_id: format!("s{s}"),
                step,
            });
        }
    }
    PredictionStream::new(vec!["event_onset".into(), "event_wakeup".into()], values)
        .and_then(|stream| stream.with_keys(keys))
        .expect("bench stream should be valid")
}

fn bench_scoring(c: &mut Criterion) {
    let stream = stream();
    let truth = truth();
    c.bench_function("extract_events_64x8640", |b| {
        b.iter(|| extract_events(black_box(&stream), 0.05, 12).expect("extraction should succeed"))
    });

    let predicted: Vec<PredictedEvent> =
        extract_events(&stream, 0.05, 12).expect("extraction should succeed");
    c.bench_function("event_ap_64_series", |b| {
        b.iter(|| {
            event_detection_ap(black_box(&predicted), &truth, &DEFAULT_TOLERANCES)
                .expect("scoring should succeed")
        })
    });
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
