// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{EventKind, EventRecord, Series, SeriesTable, StateLabel, TableStage};
use dss_preprocess::{
    AddEventLabels, AddStateLabels, DownsampleMethod, DownsampleSpec, SplitWindows,
    materialize_windows,
};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};
use std::collections::BTreeMap;

const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn make_series(id: &str, n: usize) -> Series {
    let mut columns = BTreeMap::new();
    columns.insert(
        "f_anglez".to_string(),
        (0..n).map(|v| (v as f64 * 0.37).sin()).collect(),
    );
    Series::new(
        id,
        (0..n as u64).collect(),
        (0..n as i64).map(|t| t * 5).collect(),
        0,
        columns,
    )
    .expect("generated series should be valid")
}

/// Alternating onset/wakeup events at increasing steps, some missing.
fn make_events(id: &str, gaps: &[(u64, bool)]) -> Vec<EventRecord> {
    let mut step = 0u64;
    gaps.iter()
        .enumerate()
        .map(|(i, &(gap, missing))| {
            step += gap;
            let kind = if i % 2 == 0 {
                EventKind::Onset
            } else {
                EventKind::Wakeup
            };
            EventRecord::new(id, kind, (!missing).then_some(step))
        })
        .collect()
}

#[test]
fn onset_wakeup_scenario_produces_identity_window() {
    let series = make_series("s", 4);
    let raw = series.column("f_anglez").expect("feature should exist").to_vec();
    let events = vec![
        EventRecord::new("s", EventKind::Onset, Some(1)),
        EventRecord::new("s", EventKind::Wakeup, Some(3)),
    ];

    let labelled = AddStateLabels::default()
        .transform_series(series, &events)
        .expect("labels should compute")
        .expect("series should be kept");
    let windowed = SplitWindows::new(4)
        .transform_series(labelled, &events)
        .expect("split should run")
        .expect("series should be kept");
    assert_eq!(
        windowed.state(),
        Some(
            &[
                StateLabel::Awake,
                StateLabel::Asleep,
                StateLabel::Asleep,
                StateLabel::Awake
            ][..]
        )
    );

    let table = SeriesTable::new(vec![windowed]).expect("table should be valid");
    let dataset = materialize_windows(&table, &DownsampleSpec::identity(vec!["f_anglez".into()]))
        .expect("windows should materialize");
    assert_eq!(dataset.len(), 1);
    let window = &dataset.windows()[0];
    assert_eq!(window.start(), 0);
    assert_eq!(window.len(), 4);
    assert_eq!(window.feature("f_anglez"), Some(raw.as_slice()));
    assert_eq!(window.state(), table.series()[0].state().expect("state should exist"));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        max_shrink_iters: 1024,
        failure_persistence: Some(Box::new(FileFailurePersistence::Direct("proptest-regressions/tests/label_properties.txt"))),
        .. ProptestConfig::default()
    })]

    #[test]
    fn sequential_labels_cover_every_row(
        n in 1usize..400,
        gaps in prop::collection::vec((1u64..60, prop::bool::weighted(0.2)), 0..12),
    ) {
        let series = make_series("s", n);
        let events = make_events("s", &gaps);
        let labels = AddStateLabels::default()
            .labels_for(&series, &events)
            .expect("labels should compute for generated events");
        prop_assert_eq!(labels.len(), n);
        prop_assert!(labels.iter().all(|l| *l != StateLabel::Unlabeled));
    }

    #[test]
    fn proximity_is_bounded_peaked_and_monotone(
        n in 2usize..300,
        event_step in 0u64..300,
        smoothing in 0.5f64..50.0,
        steepness in 0.5f64..4.0,
    ) {
        prop_assume!((event_step as usize) < n);
        let series = make_series("s", n);
        let events = vec![EventRecord::new("s", EventKind::Wakeup, Some(event_step))];
        let out = AddEventLabels::new(smoothing, steepness)
            .transform_series(series, &events)
            .expect("event labels should compute")
            .expect("series should be kept");
        let values = out.target("event_wakeup").expect("target should exist");
        let at = event_step as usize;

        prop_assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        prop_assert_eq!(values[at], 1.0);
        for i in at..n - 1 {
            prop_assert!(values[i + 1] <= values[i]);
        }
        for i in 1..=at {
            prop_assert!(values[i - 1] <= values[i]);
        }
        prop_assert!(out.target("event_onset").expect("onset target").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn windows_never_leave_their_series(
        lengths in prop::collection::vec(1usize..120, 1..6),
        window_size in 1usize..16,
        stride in 1usize..16,
        factor in 1usize..4,
    ) {
        let window_size = window_size * factor;
        let series: Vec<Series> = lengths
            .iter()
            .enumerate()
            .map(|(i, &n)| make_series(&format!("s{i}"), n))
            .collect();
        let stage = SplitWindows { window_size, stride: Some(stride) };
        let table = SeriesTable::new(series)
            .expect("generated table should be valid");
        let mut kept = vec![];
        for s in table.into_series() {
            let labelled = AddStateLabels::default()
                .transform_series(s, &[])
                .expect("labels should compute")
                .expect("series should be kept");
            if let Some(windowed) = stage
                .transform_series(labelled, &[])
                .expect("split should run")
            {
                kept.push(windowed);
            }
        }
        let table = SeriesTable::new(kept).expect("windowed table should be valid");
        let spec = DownsampleSpec {
            factor,
            features: vec!["f_anglez".into()],
            methods: vec![DownsampleMethod::Mean, DownsampleMethod::Max],
            standard: DownsampleMethod::Mean,
        };
        let dataset = materialize_windows(&table, &spec).expect("windows should materialize");

        for window in dataset.windows() {
            let source = table.get(window.series_id()).expect("window series should exist");
            prop_assert!(window.start() + window.len() <= source.len());
            prop_assert_eq!(window.len(), window_size);
            prop_assert_eq!(window.rows(), window_size / factor);
            prop_assert_eq!(window.steps()[0], source.steps()[window.start()]);
        }
    }
}
