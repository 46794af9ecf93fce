// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{DssError, DssResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Onset,
    Wakeup,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Onset, EventKind::Wakeup];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Onset => "onset",
            Self::Wakeup => "wakeup",
        }
    }

    /// Name of the proximity target column for this kind.
    pub fn target_name(self) -> String {
        format!("event_{}", self.as_str())
    }

    pub fn other(self) -> Self {
        match self {
            Self::Onset => Self::Wakeup,
            Self::Wakeup => Self::Onset,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onset" => Ok(Self::Onset),
            "wakeup" => Ok(Self::Wakeup),
            other => Err(DssError::data(format!(
                "unknown event kind '{other}'; expected onset or wakeup"
            ))),
        }
    }
}

/// One annotated event. A `None` step is a missing (NaN) annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub series_id: String,
    pub event: EventKind,
    pub step: Option<u64>,
    pub timestamp: Option<i64>,
}

impl EventRecord {
    pub fn new(series_id: impl Into<String>, event: EventKind, step: Option<u64>) -> Self {
        Self {
            series_id: series_id.into(),
            event,
            step,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_missing(&self) -> bool {
        self.step.is_none()
    }
}

/// Event records grouped by series, kept in file order within each series.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    by_series: BTreeMap<String, Vec<EventRecord>>,
}

impl EventTable {
    pub fn new(records: impl IntoIterator<Item = EventRecord>) -> Self {
        let mut by_series: BTreeMap<String, Vec<EventRecord>> = BTreeMap::new();
        for record in records {
            by_series
                .entry(record.series_id.clone())
                .or_default()
                .push(record);
        }
        Self { by_series }
    }

    /// Records of one series; empty when the series has no annotations.
    pub fn for_series(&self, series_id: &str) -> &[EventRecord] {
        self.by_series
            .get(series_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.by_series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_series.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.by_series.values().flatten()
    }

    /// Known steps of one kind for one series, sorted ascending.
    pub fn known_steps(&self, series_id: &str, kind: EventKind) -> Vec<u64> {
        let mut steps: Vec<u64> = self
            .for_series(series_id)
            .iter()
            .filter(|record| record.event == kind)
            .filter_map(|record| record.step)
            .collect();
        steps.sort_unstable();
        steps
    }

    /// Sub-table restricted to the given series.
    pub fn select<'s>(&self, ids: impl IntoIterator<Item = &'s str>) -> Self {
        let by_series = ids
            .into_iter()
            .filter_map(|id| {
                self.by_series
                    .get(id)
                    .map(|records| (id.to_string(), records.clone()))
            })
            .collect();
        Self { by_series }
    }
}

/// Parses an event kind or fails with a config error naming `field`.
pub fn parse_event_kind(field: &str, raw: &str) -> DssResult<EventKind> {
    raw.parse::<EventKind>()
        .map_err(|_| DssError::config(field, format!("unknown event kind '{raw}'")))
}
