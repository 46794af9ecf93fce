// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::stats::{mean_ignore_nan, median_ignore_nan, variance_ignore_nan};
use dss_core::{DssError, DssResult, SeriesTable, StateLabel, Window, WindowDataset};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Chunk aggregation applied when downsampling a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleMethod {
    Min,
    Max,
    Mean,
    Std,
    Median,
    Range,
    Var,
}

impl DownsampleMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Median => "median",
            Self::Range => "range",
            Self::Var => "var",
        }
    }

    /// Statistic over one chunk, skipping NaN. An all-NaN chunk gives NaN.
    pub fn apply(self, chunk: &[f64]) -> f64 {
        let finite = || chunk.iter().copied().filter(|v| !v.is_nan());
        match self {
            Self::Min => finite().fold(f64::NAN, f64::min),
            Self::Max => finite().fold(f64::NAN, f64::max),
            Self::Mean => mean_ignore_nan(chunk),
            Self::Std => variance_ignore_nan(chunk).sqrt(),
            Self::Median => median_ignore_nan(chunk),
            Self::Range => Self::Max.apply(chunk) - Self::Min.apply(chunk),
            Self::Var => variance_ignore_nan(chunk),
        }
    }
}

fn default_factor() -> usize {
    1
}

fn default_methods() -> Vec<DownsampleMethod> {
    vec![DownsampleMethod::Mean]
}

fn default_standard() -> DownsampleMethod {
    DownsampleMethod::Mean
}

/// Downsampling of window features.
///
/// The `standard` method is stored under the bare feature name; every other
/// method under `<feature>_<method>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownsampleSpec {
    #[serde(default = "default_factor")]
    pub factor: usize,
    pub features: Vec<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<DownsampleMethod>,
    #[serde(default = "default_standard")]
    pub standard: DownsampleMethod,
}

impl DownsampleSpec {
    pub fn identity(features: Vec<String>) -> Self {
        Self {
            factor: 1,
            features,
            methods: default_methods(),
            standard: default_standard(),
        }
    }

    pub fn validate(&self) -> DssResult<()> {
        if self.factor == 0 {
            return Err(DssError::config("factor", "must be >= 1"));
        }
        if self.features.is_empty() {
            return Err(DssError::config("features", "must name at least one feature"));
        }
        let mut seen = BTreeSet::new();
        for feature in &self.features {
            if !seen.insert(feature) {
                return Err(DssError::config(
                    "features",
                    format!("duplicate feature '{feature}'"),
                ));
            }
        }
        Ok(())
    }

    /// Fails when windows of `window_size` rows do not split into whole chunks.
    pub fn validate_window(&self, window_size: usize) -> DssResult<()> {
        if self.factor == 0 || window_size % self.factor != 0 {
            return Err(DssError::config(
                "factor",
                format!(
                    "window_size {window_size} is not divisible by downsampling factor {}",
                    self.factor
                ),
            ));
        }
        Ok(())
    }

    /// Non-standard methods, in declared order, without duplicates.
    fn extra_methods(&self) -> Vec<DownsampleMethod> {
        let mut seen = BTreeSet::new();
        self.methods
            .iter()
            .copied()
            .filter(|m| *m != self.standard && seen.insert(*m))
            .collect()
    }

    /// Output column names, in the order they are produced.
    pub fn output_names(&self) -> Vec<String> {
        let extra = self.extra_methods();
        let mut names = Vec::with_capacity(self.features.len() * (extra.len() + 1));
        for feature in &self.features {
            names.push(feature.clone());
            for method in &extra {
                names.push(format!("{feature}_{}", method.as_str()));
            }
        }
        names
    }
}

/// Most frequent label in a chunk; ties go to the label seen first.
fn majority(labels: &[StateLabel]) -> StateLabel {
    let mut counts: Vec<(StateLabel, usize)> = vec![];
    for &label in labels {
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, c)) => *c += 1,
            None => counts.push((label, 1)),
        }
    }
    let mut best = (StateLabel::Unlabeled, 0usize);
    for (label, count) in counts {
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0
}

/// Builds the training windows for every series carrying a window layout.
///
/// Targets are reduced with `max` so event peaks survive downsampling; state
/// labels take the chunk majority. Series without a layout are a data error.
pub fn materialize_windows(table: &SeriesTable, spec: &DownsampleSpec) -> DssResult<WindowDataset> {
    spec.validate()?;
    let extra = spec.extra_methods();
    let target_names: Vec<String> = table
        .series()
        .first()
        .map(|s| s.targets().keys().cloned().collect())
        .unwrap_or_default();

    let per_series: Vec<DssResult<Vec<Window>>> = table
        .series()
        .par_iter()
        .map(|series| {
            let layout = series.windows().ok_or_else(|| {
                DssError::data(format!(
                    "series '{}' has no window layout; add split_windows to preprocessing",
                    series.id()
                ))
            })?;
            spec.validate_window(layout.size)?;
            let state = series.state().ok_or_else(|| {
                DssError::data(format!(
                    "series '{}' has no state labels; add add_state_labels to preprocessing",
                    series.id()
                ))
            })?;
            let columns: Vec<(&String, &[f64])> = spec
                .features
                .iter()
                .map(|name| series.require_column(name).map(|c| (name, c)))
                .collect::<DssResult<_>>()?;

            let factor = spec.factor;
            layout
                .ranges()
                .map(|range| {
                    let chunks = range.clone().step_by(factor);
                    let steps: Vec<u64> = chunks.clone().map(|r| series.steps()[r]).collect();

                    let mut features = BTreeMap::new();
                    for (name, values) in &columns {
                        let window = &values[range.clone()];
                        features.insert(
                            (*name).clone(),
                            window.chunks(factor).map(|c| spec.standard.apply(c)).collect(),
                        );
                        for method in &extra {
                            features.insert(
                                format!("{name}_{}", method.as_str()),
                                window.chunks(factor).map(|c| method.apply(c)).collect(),
                            );
                        }
                    }

                    let window_state: Vec<StateLabel> =
                        state[range.clone()].chunks(factor).map(majority).collect();

                    let mut targets = BTreeMap::new();
                    for (name, values) in series.targets() {
                        targets.insert(
                            name.clone(),
                            values[range.clone()]
                                .chunks(factor)
                                .map(|c| DownsampleMethod::Max.apply(c))
                                .collect(),
                        );
                    }

                    Window::new(
                        series.id(),
                        range.start,
                        range.len(),
                        steps,
                        features,
                        window_state,
                        targets,
                    )
                })
                .collect()
        })
        .collect();

    let mut dataset = WindowDataset::new(spec.output_names(), target_names);
    for windows in per_series {
        for window in windows? {
            dataset.push(window)?;
        }
    }
    info!(
        windows = dataset.len(),
        rows = dataset.total_rows(),
        factor = spec.factor,
        "materialized windows"
    );
    Ok(dataset)
}
