// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventKind, EventRecord, Series, TableStage};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_events() -> Vec<EventKind> {
    EventKind::ALL.to_vec()
}

/// Smoothed event-proximity regression targets, one column per event kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddEventLabels {
    pub smoothing: f64,
    pub steepness: f64,
    #[serde(default = "default_events")]
    pub events: Vec<EventKind>,
}

impl AddEventLabels {
    pub fn new(smoothing: f64, steepness: f64) -> Self {
        Self {
            smoothing,
            steepness,
            events: default_events(),
        }
    }

    pub fn validate(&self) -> DssResult<()> {
        if !self.smoothing.is_finite() || self.smoothing <= 0.0 {
            return Err(DssError::config(
                "smoothing",
                format!("must be finite and > 0, got {}", self.smoothing),
            ));
        }
        if !self.steepness.is_finite() || self.steepness <= 0.0 {
            return Err(DssError::config(
                "steepness",
                format!("must be finite and > 0, got {}", self.steepness),
            ));
        }
        if self.events.is_empty() {
            return Err(DssError::config("events", "must name at least one event kind"));
        }
        Ok(())
    }

    /// `exp(-(d / smoothing)^steepness)`: one at the event, decaying to zero.
    pub fn proximity(&self, distance: f64) -> f64 {
        (-(distance / self.smoothing).powf(self.steepness)).exp()
    }
}

impl TableStage for AddEventLabels {
    fn kind(&self) -> &'static str {
        "add_event_labels"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "smoothing": self.smoothing,
            "steepness": self.steepness,
            "events": self.events,
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        for &kind in &self.events {
            let mut event_steps: Vec<u64> = events
                .iter()
                .filter(|e| e.event == kind)
                .filter_map(|e| e.step)
                .collect();
            event_steps.sort_unstable();
            event_steps.dedup();

            let values = if event_steps.is_empty() {
                debug!(series_id = series.id(), event = %kind, "no known events; all-zero target");
                vec![0.0; series.len()]
            } else {
                nearest_distances(series.steps(), &event_steps)
                    .into_iter()
                    .map(|d| self.proximity(d as f64))
                    .collect()
            };
            series.set_target(kind.target_name(), values)?;
        }
        Ok(Some(series))
    }
}

/// Distance from every step to the nearest event step; both inputs sorted.
pub fn nearest_distances(steps: &[u64], events: &[u64]) -> Vec<u64> {
    let mut next = 0usize;
    steps
        .iter()
        .map(|&step| {
            while next < events.len() && events[next] < step {
                next += 1;
            }
            let after = events.get(next).map(|&e| e - step);
            let before = next.checked_sub(1).map(|i| step - events[i]);
            match (before, after) {
                (Some(b), Some(a)) => b.min(a),
                (Some(d), None) | (None, Some(d)) => d,
                (None, None) => u64::MAX,
            }
        })
        .collect()
}
