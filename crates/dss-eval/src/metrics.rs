// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventKind, EventTable, PredictionStream};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Step tolerances of the event detection score (5 s steps: 1 min .. 30 min).
pub const DEFAULT_TOLERANCES: [u64; 10] = [12, 36, 60, 90, 120, 150, 180, 240, 300, 360];

/// Mean squared error over two aligned value slices.
pub fn mse(predicted: &[f64], truth: &[f64]) -> DssResult<f64> {
    if predicted.len() != truth.len() {
        return Err(DssError::shape_mismatch("mse inputs", truth.len(), predicted.len()));
    }
    if predicted.is_empty() {
        return Err(DssError::data("mse of empty inputs is undefined"));
    }
    let total: f64 = predicted
        .iter()
        .zip(truth)
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    Ok(total / predicted.len() as f64)
}

/// One detected event with its confidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictedEvent {
    pub series_id: String,
    pub event: EventKind,
    pub step: u64,
    pub score: f64,
}

fn channel_kind(channel: &str) -> Option<EventKind> {
    EventKind::ALL
        .into_iter()
        .find(|kind| kind.target_name() == channel)
}

/// Picks events from the `event_onset` / `event_wakeup` channels of a keyed
/// stream.
///
/// Rows sharing a `(series, step)` key keep their highest score. Candidates
/// at or above `threshold` are accepted greedily by descending score, and a
/// candidate within `min_distance` steps of an accepted one is suppressed.
pub fn extract_events(
    stream: &PredictionStream,
    threshold: f64,
    min_distance: u64,
) -> DssResult<Vec<PredictedEvent>> {
    if stream.keys().len() != stream.rows() {
        return Err(DssError::data(
            "event extraction needs a prediction stream with row keys",
        ));
    }
    let mut events = Vec::new();
    for (channel_idx, channel) in stream.channels().iter().enumerate() {
        let Some(kind) = channel_kind(channel) else {
            continue;
        };
        let mut per_series: BTreeMap<&str, BTreeMap<u64, f64>> = BTreeMap::new();
        for (row, key) in stream.keys().iter().enumerate() {
            let score = stream.row(row)[channel_idx];
            if score.is_nan() {
                continue;
            }
            let slot = per_series
                .entry(key.series_id.as_str())
                .or_default()
                .entry(key.step)
                .or_insert(f64::NEG_INFINITY);
            *slot = slot.max(score);
        }

        for (series_id, scores) in per_series {
            let mut candidates: Vec<(u64, f64)> = scores
                .into_iter()
                .filter(|(_, score)| *score >= threshold)
                .collect();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let mut accepted: Vec<u64> = Vec::new();
            for (step, score) in candidates {
                if accepted.iter().any(|&s| s.abs_diff(step) < min_distance) {
                    continue;
                }
                accepted.push(step);
                events.push(PredictedEvent {
                    series_id: series_id.to_string(),
                    event: kind,
                    step,
                    score,
                });
            }
        }
    }
    events.sort_by(|a, b| {
        (a.series_id.as_str(), a.event, a.step).cmp(&(b.series_id.as_str(), b.event, b.step))
    });
    Ok(events)
}

/// Event detection average precision per event kind, averaged over tolerances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventApReport {
    /// Kinds with no ground-truth event are absent.
    pub per_kind: BTreeMap<EventKind, f64>,
    /// Mean over the scored kinds; zero when nothing could be scored.
    pub score: f64,
}

/// Mean average precision of `predicted` against the known events in `truth`.
///
/// `truth` should already be restricted to the evaluated series. Each
/// prediction, in descending score order, matches the nearest unmatched
/// ground-truth event of the same series and kind within the tolerance.
pub fn event_detection_ap(
    predicted: &[PredictedEvent],
    truth: &EventTable,
    tolerances: &[u64],
) -> DssResult<EventApReport> {
    if tolerances.is_empty() {
        return Err(DssError::config("scoring.tolerances", "must be non-empty"));
    }
    let series: BTreeSet<&str> = truth.series_ids().collect();
    let mut per_kind = BTreeMap::new();
    for kind in EventKind::ALL {
        let gt_total: usize = series
            .iter()
            .map(|id| truth.known_steps(id, kind).len())
            .sum();
        if gt_total == 0 {
            continue;
        }
        let mut preds: Vec<&PredictedEvent> = predicted
            .iter()
            .filter(|p| p.event == kind && series.contains(p.series_id.as_str()))
            .collect();
        preds.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.series_id.cmp(&b.series_id))
                .then(a.step.cmp(&b.step))
        });

        let ap_sum: f64 = tolerances
            .iter()
            .map(|&tolerance| {
                let matches = match_predictions(&preds, truth, kind, tolerance);
                average_precision(&preds, &matches, gt_total)
            })
            .sum();
        per_kind.insert(kind, ap_sum / tolerances.len() as f64);
    }
    let score = if per_kind.is_empty() {
        0.0
    } else {
        per_kind.values().sum::<f64>() / per_kind.len() as f64
    };
    Ok(EventApReport { per_kind, score })
}

/// Whether each prediction (in the given order) is a true positive.
fn match_predictions(
    preds: &[&PredictedEvent],
    truth: &EventTable,
    kind: EventKind,
    tolerance: u64,
) -> Vec<bool> {
    let mut open: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    preds
        .iter()
        .map(|pred| {
            let gt = open
                .entry(pred.series_id.as_str())
                .or_insert_with(|| truth.known_steps(&pred.series_id, kind));
            let nearest = gt
                .iter()
                .enumerate()
                .filter(|(_, step)| step.abs_diff(pred.step) <= tolerance)
                .min_by_key(|(_, step)| step.abs_diff(pred.step))
                .map(|(idx, _)| idx);
            match nearest {
                Some(idx) => {
                    gt.remove(idx);
                    true
                }
                None => false,
            }
        })
        .collect()
}

/// Step-wise area under the precision/recall curve; tied scores form one step.
fn average_precision(preds: &[&PredictedEvent], matches: &[bool], gt_total: usize) -> f64 {
    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut last_recall = 0.0;
    let mut idx = 0;
    while idx < preds.len() {
        let score = preds[idx].score;
        while idx < preds.len() && preds[idx].score == score {
            tp += usize::from(matches[idx]);
            seen += 1;
            idx += 1;
        }
        let recall = tp as f64 / gt_total as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - last_recall) * precision;
        last_recall = recall;
    }
    ap
}
