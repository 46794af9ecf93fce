// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::similarity::{SIMILARITY_COLUMN, SIMILARITY_FEATURE};
use dss_core::{DssError, DssResult, EventKind, EventRecord, Series, StateLabel, TableStage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How annotated events are turned into state intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Each event closes the segment since the previous event: an onset ends
    /// an awake stretch, a wakeup ends an asleep stretch. The tail after the
    /// last event takes the opposite state.
    #[default]
    Sequential,
    /// Each onset is paired with the immediately following wakeup. Rows inside
    /// a pair are asleep, rows between pairs awake, and rows around an
    /// unpaired event are ignored.
    NearestPair,
}

fn default_tolerance() -> usize {
    1
}

/// Dense per-row sleep state from sparse onset/wakeup annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddStateLabels {
    #[serde(default)]
    pub use_similarity_nan: bool,
    #[serde(default)]
    pub fill_limit: Option<usize>,
    #[serde(default = "default_tolerance")]
    pub nan_tolerance_window: usize,
    #[serde(default)]
    pub pairing: PairingPolicy,
}

impl Default for AddStateLabels {
    fn default() -> Self {
        Self {
            use_similarity_nan: false,
            fill_limit: None,
            nan_tolerance_window: 1,
            pairing: PairingPolicy::Sequential,
        }
    }
}

impl AddStateLabels {
    pub fn validate(&self) -> DssResult<()> {
        if self.nan_tolerance_window == 0 {
            return Err(DssError::config("nan_tolerance_window", "must be >= 1"));
        }
        match (self.use_similarity_nan, self.fill_limit) {
            (true, None) => {
                return Err(DssError::config(
                    "fill_limit",
                    "required when use_similarity_nan is true",
                ));
            }
            (_, Some(0)) => return Err(DssError::config("fill_limit", "must be >= 1")),
            _ => {}
        }
        if self.use_similarity_nan && self.pairing == PairingPolicy::NearestPair {
            return Err(DssError::config(
                "pairing",
                "nearest_pair cannot be combined with use_similarity_nan",
            ));
        }
        Ok(())
    }

    /// Computes the labels for one series without attaching them.
    pub fn labels_for(&self, series: &Series, events: &[EventRecord]) -> DssResult<Vec<StateLabel>> {
        let n = series.len();
        if events.is_empty() {
            warn!(series_id = series.id(), "no events; labelling every row as ignore");
            return Ok(vec![StateLabel::Ignore; n]);
        }

        if self.use_similarity_nan {
            let similarity = series
                .column(SIMILARITY_FEATURE)
                .or_else(|| series.column(SIMILARITY_COLUMN))
                .ok_or_else(|| {
                    DssError::data(format!(
                        "series '{}' has no {SIMILARITY_FEATURE} or {SIMILARITY_COLUMN} column; \
                         run similarity_nan before add_state_labels",
                        series.id()
                    ))
                })?;
            let fill_limit = self.fill_limit.unwrap_or(usize::MAX);
            return Ok(label_with_similarity(
                series,
                events,
                similarity,
                fill_limit,
                self.nan_tolerance_window,
            ));
        }

        Ok(match self.pairing {
            PairingPolicy::Sequential => label_sequential(series, events),
            PairingPolicy::NearestPair => label_nearest_pair(series, events),
        })
    }
}

impl TableStage for AddStateLabels {
    fn kind(&self) -> &'static str {
        "add_state_labels"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "use_similarity_nan": self.use_similarity_nan,
            "fill_limit": self.fill_limit,
            "nan_tolerance_window": self.nan_tolerance_window,
            "pairing": self.pairing,
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let labels = self.labels_for(&series, events)?;
        series.set_state(labels)?;
        Ok(Some(series))
    }
}

/// Row index for an event step: the exact row, or where it would be inserted.
fn row_at(series: &Series, step: u64) -> usize {
    match series.row_of_step(step) {
        Ok(row) | Err(row) => row,
    }
}

fn state_before(kind: EventKind) -> StateLabel {
    match kind {
        EventKind::Onset => StateLabel::Awake,
        EventKind::Wakeup => StateLabel::Asleep,
    }
}

fn state_after(kind: EventKind) -> StateLabel {
    match kind {
        EventKind::Onset => StateLabel::Asleep,
        EventKind::Wakeup => StateLabel::Awake,
    }
}

/// Known events mapped to rows, skipping steps that go backwards.
fn ordered_rows<'e>(
    series: &Series,
    events: &'e [EventRecord],
) -> impl Iterator<Item = (&'e EventRecord, Option<usize>)> {
    let mut prev = 0usize;
    events.iter().filter_map(move |event| match event.step {
        None => Some((event, None)),
        Some(step) => {
            let row = row_at(series, step);
            if row < prev {
                warn!(
                    series_id = series.id(),
                    step, "event step precedes the previous event; skipping"
                );
                return None;
            }
            prev = row;
            Some((event, Some(row)))
        }
    })
}

fn label_sequential(series: &Series, events: &[EventRecord]) -> Vec<StateLabel> {
    let n = series.len();
    let mut labels = vec![StateLabel::Ignore; n];
    let mut prev = 0usize;
    let mut prev_was_missing = false;
    let mut last_kind = None;

    for (event, row) in ordered_rows(series, events) {
        let Some(row) = row else {
            prev_was_missing = true;
            continue;
        };
        let value = if prev_was_missing {
            StateLabel::Ignore
        } else {
            state_before(event.event)
        };
        labels[prev..row].fill(value);
        prev = row;
        prev_was_missing = false;
        last_kind = Some(event.event);
    }

    let tail = match (prev_was_missing, last_kind) {
        (false, Some(kind)) => state_after(kind),
        _ => StateLabel::Ignore,
    };
    labels[prev..].fill(tail);
    labels
}

fn label_nearest_pair(series: &Series, events: &[EventRecord]) -> Vec<StateLabel> {
    let n = series.len();
    let mut known: Vec<(usize, EventKind)> = events
        .iter()
        .filter_map(|event| event.step.map(|step| (row_at(series, step), event.event)))
        .collect();
    known.sort_by_key(|(row, _)| *row);

    if known.is_empty() {
        debug!(series_id = series.id(), "only missing events; labelling every row as ignore");
        return vec![StateLabel::Ignore; n];
    }

    let mut labels = vec![StateLabel::Awake; n];
    let mut i = 0;
    let mut boundary = 0usize;
    while i < known.len() {
        let (row, kind) = known[i];
        let next = known.get(i + 1).copied();
        match (kind, next) {
            (EventKind::Onset, Some((end, EventKind::Wakeup))) => {
                labels[row..end].fill(StateLabel::Asleep);
                boundary = end;
                i += 2;
            }
            (EventKind::Onset, next) => {
                let end = next.map_or(n, |(end, _)| end);
                labels[row..end].fill(StateLabel::Ignore);
                boundary = end;
                i += 1;
            }
            (EventKind::Wakeup, _) => {
                labels[boundary..row].fill(StateLabel::Ignore);
                boundary = row;
                i += 1;
            }
        }
    }
    labels
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Previous {
    Known(EventKind),
    Missing,
}

fn label_with_similarity(
    series: &Series,
    events: &[EventRecord],
    similarity: &[f64],
    fill_limit: usize,
    tolerance: usize,
) -> Vec<StateLabel> {
    let mut labels: Vec<StateLabel> = similarity
        .iter()
        .map(|&s| {
            if s == 0.0 {
                StateLabel::Ignore
            } else {
                StateLabel::Unlabeled
            }
        })
        .collect();

    let mut prev = 0usize;
    let mut previous: Option<Previous> = None;
    for (event, row) in ordered_rows(series, events) {
        match row {
            None => {
                if let Some(Previous::Known(kind)) = previous {
                    fill_forward(&mut labels, prev, state_after(kind), fill_limit, tolerance);
                }
                previous = Some(Previous::Missing);
            }
            Some(row) => {
                let value = state_before(event.event);
                if previous == Some(Previous::Missing) {
                    fill_backward(&mut labels, prev, row, value, fill_limit, tolerance);
                } else {
                    labels[prev..row].fill(value);
                }
                prev = row;
                previous = Some(Previous::Known(event.event));
            }
        }
    }

    if let Some(Previous::Known(kind)) = previous {
        fill_forward(&mut labels, prev, state_after(kind), fill_limit, tolerance);
    }
    labels
}

/// Start of the first run of `run` consecutive ignore rows inside `range`.
fn first_ignore_run(labels: &[StateLabel], start: usize, end: usize, run: usize) -> Option<usize> {
    let mut count = 0;
    for (idx, label) in labels[start..end].iter().enumerate() {
        if *label == StateLabel::Ignore {
            count += 1;
            if count == run {
                return Some(start + idx + 1 - run);
            }
        } else {
            count = 0;
        }
    }
    None
}

/// End (exclusive) of the last run of `run` consecutive ignore rows inside `range`.
fn last_ignore_run(labels: &[StateLabel], start: usize, end: usize, run: usize) -> Option<usize> {
    let mut count = 0;
    for idx in (start..end).rev() {
        if labels[idx] == StateLabel::Ignore {
            count += 1;
            if count == run {
                return Some(idx + run);
            }
        } else {
            count = 0;
        }
    }
    None
}

fn fill_forward(
    labels: &mut [StateLabel],
    from: usize,
    value: StateLabel,
    fill_limit: usize,
    tolerance: usize,
) {
    let limit_end = from.saturating_add(fill_limit).min(labels.len());
    let end = first_ignore_run(labels, from, limit_end, tolerance).unwrap_or(limit_end);
    labels[from..end].fill(value);
}

fn fill_backward(
    labels: &mut [StateLabel],
    from: usize,
    to: usize,
    value: StateLabel,
    fill_limit: usize,
    tolerance: usize,
) {
    let start = last_ignore_run(labels, from, to, tolerance)
        .unwrap_or(from)
        .max(to.saturating_sub(fill_limit));
    labels[start..to].fill(value);
}

#[cfg(test)]
mod tests {
    use super::{AddStateLabels, PairingPolicy};
    use dss_core::{DssError, EventKind, EventRecord, Series, StateLabel, TableStage};
    use std::collections::BTreeMap;

    use StateLabel::{Asleep as S, Awake as A, Ignore as I, Unlabeled as U};

    fn series(n: u64) -> Series {
        let mut columns = BTreeMap::new();
        columns.insert("anglez".to_string(), vec![0.5; n as usize]);
        Series::new("s", (0..n).collect(), (0..n as i64).collect(), 0, columns)
            .expect("series should be valid")
    }

    fn series_with_similarity(similarity: Vec<f64>) -> Series {
        let n = similarity.len() as u64;
        let mut s = series(n);
        s.set_column("f_similarity_nan", similarity)
            .expect("similarity column should fit");
        s
    }

    fn ev(kind: EventKind, step: Option<u64>) -> EventRecord {
        EventRecord::new("s", kind, step)
    }

    #[test]
    fn sequential_labels_match_onset_wakeup_scenario() {
        let events = vec![ev(EventKind::Onset, Some(1)), ev(EventKind::Wakeup, Some(3))];
        let labels = AddStateLabels::default()
            .labels_for(&series(6), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, S, S, A, A, A]);
    }

    #[test]
    fn sequential_tail_after_onset_is_asleep() {
        let events = vec![ev(EventKind::Onset, Some(2))];
        let labels = AddStateLabels::default()
            .labels_for(&series(4), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, A, S, S]);
    }

    #[test]
    fn missing_event_marks_following_segment_ignore() {
        let events = vec![
            ev(EventKind::Onset, Some(1)),
            ev(EventKind::Wakeup, Some(3)),
            ev(EventKind::Onset, None),
            ev(EventKind::Wakeup, None),
            ev(EventKind::Onset, Some(7)),
            ev(EventKind::Wakeup, Some(8)),
        ];
        let labels = AddStateLabels::default()
            .labels_for(&series(10), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, S, S, I, I, I, I, S, A, A]);
    }

    #[test]
    fn trailing_missing_event_leaves_ignore_tail() {
        let events = vec![ev(EventKind::Onset, Some(1)), ev(EventKind::Wakeup, None)];
        let labels = AddStateLabels::default()
            .labels_for(&series(4), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, I, I, I]);
    }

    #[test]
    fn zero_events_fall_back_to_ignore() {
        let labels = AddStateLabels::default()
            .labels_for(&series(3), &[])
            .expect("zero events is not an error");
        assert_eq!(labels, vec![I, I, I]);
    }

    #[test]
    fn out_of_order_event_is_skipped() {
        let events = vec![
            ev(EventKind::Onset, Some(3)),
            ev(EventKind::Wakeup, Some(1)),
            ev(EventKind::Wakeup, Some(5)),
        ];
        let labels = AddStateLabels::default()
            .labels_for(&series(6), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, A, A, S, S, A]);
    }

    #[test]
    fn nearest_pair_ignores_unpaired_events() {
        let stage = AddStateLabels {
            pairing: PairingPolicy::NearestPair,
            ..AddStateLabels::default()
        };
        let events = vec![
            ev(EventKind::Onset, Some(1)),
            ev(EventKind::Wakeup, Some(3)),
            ev(EventKind::Onset, None),
            ev(EventKind::Wakeup, Some(6)),
            ev(EventKind::Onset, Some(8)),
        ];
        let labels = stage
            .labels_for(&series(10), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![A, S, S, I, I, I, A, A, I, I]);
    }

    #[test]
    fn similarity_mode_requires_fill_limit() {
        let stage = AddStateLabels {
            use_similarity_nan: true,
            ..AddStateLabels::default()
        };
        let err = stage.validate().expect_err("missing fill_limit should fail");
        assert!(matches!(err, DssError::Config { ref field, .. } if field == "fill_limit"));
    }

    #[test]
    fn similarity_mode_requires_similarity_column() {
        let stage = AddStateLabels {
            use_similarity_nan: true,
            fill_limit: Some(3),
            ..AddStateLabels::default()
        };
        let err = stage
            .labels_for(&series(4), &[ev(EventKind::Onset, Some(1))])
            .expect_err("missing similarity column should fail");
        assert!(err.to_string().contains("similarity_nan"));
    }

    #[test]
    fn similarity_mode_fills_up_to_limit_and_stops_at_ignore_run() {
        let stage = AddStateLabels {
            use_similarity_nan: true,
            fill_limit: Some(3),
            nan_tolerance_window: 2,
            ..AddStateLabels::default()
        };
        // rows 6 and 7 are duplicated signal
        let mut similarity = vec![1.0; 12];
        similarity[6] = 0.0;
        similarity[7] = 0.0;
        let events = vec![
            ev(EventKind::Onset, Some(1)),
            ev(EventKind::Wakeup, Some(5)),
            ev(EventKind::Onset, None),
            ev(EventKind::Wakeup, Some(11)),
        ];
        let labels = stage
            .labels_for(&series_with_similarity(similarity), &events)
            .expect("labels should compute");
        // forward fill after the wakeup at 5 stops at the ignore run starting at 6;
        // backward fill before the wakeup at 11 is capped at 3 rows.
        assert_eq!(labels, vec![A, S, S, S, S, A, I, I, S, S, S, A]);
    }

    #[test]
    fn similarity_mode_tolerates_short_ignore_gaps() {
        let stage = AddStateLabels {
            use_similarity_nan: true,
            fill_limit: Some(4),
            nan_tolerance_window: 2,
            ..AddStateLabels::default()
        };
        let mut similarity = vec![1.0; 8];
        similarity[3] = 0.0;
        let events = vec![ev(EventKind::Wakeup, Some(1))];
        let labels = stage
            .labels_for(&series_with_similarity(similarity), &events)
            .expect("labels should compute");
        assert_eq!(labels, vec![S, A, A, A, A, U, U, U]);
    }

    #[test]
    fn stage_attaches_state_and_params_are_canonical() {
        let stage = AddStateLabels::default();
        let out = stage
            .transform_series(series(4), &[ev(EventKind::Onset, Some(2))])
            .expect("stage should run")
            .expect("series should be kept");
        assert_eq!(out.state(), Some(&[A, A, S, S][..]));
        assert_eq!(stage.params()["pairing"], "sequential");
        assert_eq!(stage.kind(), "add_state_labels");
    }
}
