// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::window::WindowLayout;
use crate::{DssError, DssResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-row sleep state code.
///
/// The numeric codes match the raw label files: rows before an onset and after
/// a wakeup are `Awake`, rows between are `Asleep`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StateLabel {
    Asleep = 0,
    Awake = 1,
    /// Signal is missing or duplicated; do not predict.
    Ignore = 2,
    /// No event information covers this row.
    Unlabeled = 3,
}

impl StateLabel {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Asleep),
            1 => Some(Self::Awake),
            2 => Some(Self::Ignore),
            3 => Some(Self::Unlabeled),
            _ => None,
        }
    }

    /// True for the two labels a model is trained against.
    pub fn is_known(self) -> bool {
        matches!(self, Self::Asleep | Self::Awake)
    }
}

/// One continuous recording of one subject.
///
/// Rows are keyed by `steps`, which are strictly increasing. Every column,
/// target and the state label vector has exactly one entry per row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    id: String,
    steps: Vec<u64>,
    timestamps: Vec<i64>,
    utc_offset_seconds: i32,
    columns: BTreeMap<String, Vec<f64>>,
    state: Option<Vec<StateLabel>>,
    targets: BTreeMap<String, Vec<f64>>,
    windows: Option<WindowLayout>,
}

impl Series {
    /// Constructs a validated series without labels.
    pub fn new(
        id: impl Into<String>,
        steps: Vec<u64>,
        timestamps: Vec<i64>,
        utc_offset_seconds: i32,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> DssResult<Self> {
        let series = Self {
            id: id.into(),
            steps,
            timestamps,
            utc_offset_seconds,
            columns,
            state: None,
            targets: BTreeMap::new(),
            windows: None,
        };
        series.validate()?;
        Ok(series)
    }

    /// Re-checks every row-count and ordering invariant.
    pub fn validate(&self) -> DssResult<()> {
        let n = self.steps.len();
        if self.id.trim().is_empty() {
            return Err(DssError::data("series id must be non-empty"));
        }
        if n == 0 {
            return Err(DssError::data(format!("series '{}' has zero rows", self.id)));
        }
        if self.timestamps.len() != n {
            return Err(DssError::shape_mismatch(
                format!("series '{}' timestamps", self.id),
                n,
                self.timestamps.len(),
            ));
        }
        if let Some(idx) = self.steps.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(DssError::data(format!(
                "series '{}' steps must be strictly increasing: step[{}]={} followed by step[{}]={}",
                self.id,
                idx,
                self.steps[idx],
                idx + 1,
                self.steps[idx + 1]
            )));
        }
        for (name, values) in self.columns.iter().chain(self.targets.iter()) {
            if values.len() != n {
                return Err(DssError::shape_mismatch(
                    format!("series '{}' column '{name}'", self.id),
                    n,
                    values.len(),
                ));
            }
        }
        if let Some(state) = &self.state
            && state.len() != n
        {
            return Err(DssError::shape_mismatch(
                format!("series '{}' state labels", self.id),
                n,
                state.len(),
            ));
        }
        if let Some(layout) = &self.windows {
            layout.validate(n).map_err(|err| match err {
                DssError::Data(msg) => DssError::data(format!("series '{}': {msg}", self.id)),
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn utc_offset_seconds(&self) -> i32 {
        self.utc_offset_seconds
    }

    pub fn columns(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Returns the named column or a data error naming the series.
    pub fn require_column(&self, name: &str) -> DssResult<&[f64]> {
        self.column(name).ok_or_else(|| {
            DssError::data(format!(
                "series '{}' has no column '{name}'; available: {}",
                self.id,
                self.columns.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Appends or replaces a column.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> DssResult<()> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(DssError::shape_mismatch(
                format!("series '{}' column '{name}'", self.id),
                self.len(),
                values.len(),
            ));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn state(&self) -> Option<&[StateLabel]> {
        self.state.as_deref()
    }

    pub fn set_state(&mut self, state: Vec<StateLabel>) -> DssResult<()> {
        if state.len() != self.len() {
            return Err(DssError::shape_mismatch(
                format!("series '{}' state labels", self.id),
                self.len(),
                state.len(),
            ));
        }
        self.state = Some(state);
        Ok(())
    }

    pub fn targets(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&[f64]> {
        self.targets.get(name).map(Vec::as_slice)
    }

    pub fn set_target(&mut self, name: impl Into<String>, values: Vec<f64>) -> DssResult<()> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(DssError::shape_mismatch(
                format!("series '{}' target '{name}'", self.id),
                self.len(),
                values.len(),
            ));
        }
        self.targets.insert(name, values);
        Ok(())
    }

    pub fn windows(&self) -> Option<&WindowLayout> {
        self.windows.as_ref()
    }

    pub fn set_windows(&mut self, layout: WindowLayout) -> DssResult<()> {
        layout.validate(self.len())?;
        self.windows = Some(layout);
        Ok(())
    }

    /// Row index holding `step`, or the insertion point when the step is absent.
    pub fn row_of_step(&self, step: u64) -> Result<usize, usize> {
        self.steps.binary_search(&step)
    }

    /// Keeps the rows whose mask entry is true, in order.
    ///
    /// Any window layout is discarded because row positions change.
    pub fn retain_rows(&mut self, keep: &[bool]) -> DssResult<()> {
        if keep.len() != self.len() {
            return Err(DssError::shape_mismatch(
                format!("series '{}' row mask", self.id),
                self.len(),
                keep.len(),
            ));
        }
        fn filter<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(keep)
                .filter_map(|(v, k)| k.then_some(*v))
                .collect()
        }
        self.steps = filter(&self.steps, keep);
        self.timestamps = filter(&self.timestamps, keep);
        for values in self.columns.values_mut() {
            *values = filter(values, keep);
        }
        for values in self.targets.values_mut() {
            *values = filter(values, keep);
        }
        if let Some(state) = &mut self.state {
            *state = filter(state, keep);
        }
        self.windows = None;
        Ok(())
    }
}

/// Row-ordered multi-series table; the canonical value passed between stages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    series: Vec<Series>,
}

impl SeriesTable {
    /// Constructs a validated table; series ids must be unique.
    pub fn new(series: Vec<Series>) -> DssResult<Self> {
        let table = Self { series };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> DssResult<()> {
        let mut seen = BTreeSet::new();
        for series in &self.series {
            if !seen.insert(series.id()) {
                return Err(DssError::data(format!(
                    "duplicate series id '{}' in table",
                    series.id()
                )));
            }
            series.validate()?;
        }
        Ok(())
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn into_series(self) -> Vec<Series> {
        self.series
    }

    pub fn get(&self, id: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.series.iter().map(Series::len).sum()
    }

    pub fn series_ids(&self) -> Vec<String> {
        self.series.iter().map(|s| s.id().to_string()).collect()
    }

    /// Sub-table holding only the listed series, in table order.
    pub fn select(&self, ids: &BTreeSet<String>) -> Self {
        Self {
            series: self
                .series
                .iter()
                .filter(|s| ids.contains(s.id()))
                .cloned()
                .collect(),
        }
    }

    /// Applies `f` to every series in parallel, keeping table order.
    ///
    /// `f` returning `Ok(None)` drops the series. The first error in table
    /// order is returned together with the offending series id.
    pub fn try_map_series<F>(self, f: F) -> Result<Self, (String, DssError)>
    where
        F: Fn(Series) -> DssResult<Option<Series>> + Sync + Send,
    {
        let results: Vec<(String, DssResult<Option<Series>>)> = self
            .series
            .into_par_iter()
            .map(|series| {
                let id = series.id().to_string();
                (id, f(series))
            })
            .collect();

        let mut series = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(Some(s)) => series.push(s),
                Ok(None) => {}
                Err(err) => return Err((id, err)),
            }
        }
        Ok(Self { series })
    }

    /// Like [`Self::try_map_series`] but collects per-series failures instead of
    /// stopping at the first one.
    pub fn map_series_lenient<F>(self, f: F) -> (Self, Vec<(String, DssError)>)
    where
        F: Fn(Series) -> DssResult<Option<Series>> + Sync + Send,
    {
        let results: Vec<(String, DssResult<Option<Series>>)> = self
            .series
            .into_par_iter()
            .map(|series| {
                let id = series.id().to_string();
                (id, f(series))
            })
            .collect();

        let mut series = Vec::with_capacity(results.len());
        let mut failures = vec![];
        for (id, result) in results {
            match result {
                Ok(Some(s)) => series.push(s),
                Ok(None) => {}
                Err(err) => failures.push((id, err)),
            }
        }
        (Self { series }, failures)
    }
}
