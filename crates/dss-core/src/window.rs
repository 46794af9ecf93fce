// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::table::StateLabel;
use crate::{DssError, DssResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-size window starts recorded on a series by `split_windows`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLayout {
    pub size: usize,
    pub starts: Vec<usize>,
}

impl WindowLayout {
    /// Window starts `0, stride, 2*stride, ..` whose full window fits in `rows`.
    pub fn strided(rows: usize, size: usize, stride: usize) -> DssResult<Self> {
        if size == 0 {
            return Err(DssError::config("window_size", "must be >= 1"));
        }
        if stride == 0 {
            return Err(DssError::config("stride", "must be >= 1"));
        }
        let starts = if rows < size {
            vec![]
        } else {
            (0..=rows - size).step_by(stride).collect()
        };
        Ok(Self { size, starts })
    }

    /// Checks that every window lies inside `rows` and starts are increasing.
    pub fn validate(&self, rows: usize) -> DssResult<()> {
        if self.size == 0 {
            return Err(DssError::data("window layout size must be >= 1"));
        }
        if let Some(idx) = self.starts.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DssError::data(format!(
                "window starts must be strictly increasing at index {}",
                idx + 1
            )));
        }
        if let Some(&last) = self.starts.last()
            && last + self.size > rows
        {
            return Err(DssError::data(format!(
                "window starting at row {last} with size {} exceeds {rows} rows",
                self.size
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Row ranges `[start, start + size)` of each window.
    pub fn ranges(&self) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        self.starts.iter().map(move |&start| start..start + self.size)
    }
}

/// One materialized training window.
///
/// `start` and `len` are in raw rows of the source series; `steps`, features,
/// state and targets are in downsampled rows (`len / factor` entries each).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Window {
    series_id: String,
    start: usize,
    len: usize,
    steps: Vec<u64>,
    features: BTreeMap<String, Vec<f64>>,
    state: Vec<StateLabel>,
    targets: BTreeMap<String, Vec<f64>>,
}

impl Window {
    pub fn new(
        series_id: impl Into<String>,
        start: usize,
        len: usize,
        steps: Vec<u64>,
        features: BTreeMap<String, Vec<f64>>,
        state: Vec<StateLabel>,
        targets: BTreeMap<String, Vec<f64>>,
    ) -> DssResult<Self> {
        let series_id = series_id.into();
        let rows = steps.len();
        if rows == 0 {
            return Err(DssError::data(format!(
                "window of series '{series_id}' at row {start} has zero rows"
            )));
        }
        if state.len() != rows {
            return Err(DssError::shape_mismatch(
                format!("window '{series_id}'@{start} state"),
                rows,
                state.len(),
            ));
        }
        for (name, values) in features.iter().chain(targets.iter()) {
            if values.len() != rows {
                return Err(DssError::shape_mismatch(
                    format!("window '{series_id}'@{start} column '{name}'"),
                    rows,
                    values.len(),
                ));
            }
        }
        Ok(Self {
            series_id,
            start,
            len,
            steps,
            features,
            state,
            targets,
        })
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Raw row count covered by this window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Downsampled row count.
    pub fn rows(&self) -> usize {
        self.steps.len()
    }

    /// First raw step of every downsampled row.
    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    pub fn features(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(Vec::as_slice)
    }

    pub fn state(&self) -> &[StateLabel] {
        &self.state
    }

    pub fn targets(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&[f64]> {
        self.targets.get(name).map(Vec::as_slice)
    }

    /// Feature vector of one downsampled row, in the given column order.
    pub fn feature_row(&self, row: usize, names: &[String]) -> DssResult<Vec<f64>> {
        names
            .iter()
            .map(|name| {
                self.features
                    .get(name)
                    .and_then(|values| values.get(row).copied())
                    .ok_or_else(|| {
                        DssError::data(format!(
                            "window '{}'@{} has no feature '{name}' at row {row}",
                            self.series_id, self.start
                        ))
                    })
            })
            .collect()
    }
}

/// Append-only collection of windows sharing one feature/target schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowDataset {
    feature_names: Vec<String>,
    target_names: Vec<String>,
    windows: Vec<Window>,
}

impl WindowDataset {
    pub fn new(feature_names: Vec<String>, target_names: Vec<String>) -> Self {
        Self {
            feature_names,
            target_names,
            windows: vec![],
        }
    }

    /// Appends a window whose schema matches the dataset.
    pub fn push(&mut self, window: Window) -> DssResult<()> {
        for name in &self.feature_names {
            if !window.features.contains_key(name) {
                return Err(DssError::data(format!(
                    "window '{}'@{} is missing feature '{name}'",
                    window.series_id, window.start
                )));
            }
        }
        for name in &self.target_names {
            if !window.targets.contains_key(name) {
                return Err(DssError::data(format!(
                    "window '{}'@{} is missing target '{name}'",
                    window.series_id, window.start
                )));
            }
        }
        self.windows.push(window);
        Ok(())
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Total downsampled rows across all windows.
    pub fn total_rows(&self) -> usize {
        self.windows.iter().map(Window::rows).sum()
    }

    /// Windows whose series id satisfies `keep`, schema preserved.
    pub fn filter_series(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            target_names: self.target_names.clone(),
            windows: self
                .windows
                .iter()
                .filter(|w| keep(w.series_id()))
                .cloned()
                .collect(),
        }
    }
}
