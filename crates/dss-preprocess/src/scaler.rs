// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::stats::{collect_valid, mean_ignore_nan, median_of_slice, variance_ignore_nan};
use dss_core::{DssError, DssResult, Window, WindowDataset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_MAD_EPSILON: f64 = 1.0e-9;
const DEFAULT_NORMAL_CONSISTENCY: f64 = 1.4826;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    #[default]
    None,
    /// Zero mean, unit variance.
    Standard,
    /// Maps the observed range onto `[0, 1]`.
    MinMax,
    /// Median centering, MAD scaling.
    Robust,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalerSpec {
    #[serde(default)]
    pub kind: ScalerKind,
}

/// Per-feature `(center, scale)` fitted on the training split only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    pub kind: ScalerKind,
    pub params: BTreeMap<String, (f64, f64)>,
}

impl FittedScaler {
    pub fn fit(kind: ScalerKind, dataset: &WindowDataset) -> DssResult<Self> {
        let mut params = BTreeMap::new();
        if kind == ScalerKind::None {
            return Ok(Self { kind, params });
        }
        for name in dataset.feature_names() {
            let values: Vec<f64> = dataset
                .windows()
                .iter()
                .filter_map(|w| w.feature(name))
                .flatten()
                .copied()
                .collect();
            let valid = collect_valid(&values);
            if valid.is_empty() {
                params.insert(name.clone(), (0.0, 1.0));
                continue;
            }
            let (center, scale) = match kind {
                ScalerKind::None => (0.0, 1.0),
                ScalerKind::Standard => {
                    (mean_ignore_nan(&valid), variance_ignore_nan(&valid).sqrt())
                }
                ScalerKind::MinMax => {
                    let min = valid.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    (min, max - min)
                }
                ScalerKind::Robust => {
                    let median = median_of_slice(&valid).ok_or_else(|| {
                        DssError::data(format!(
                            "robust scaling could not compute median for feature '{name}'"
                        ))
                    })?;
                    let deviations: Vec<f64> = valid.iter().map(|v| (v - median).abs()).collect();
                    let mad = median_of_slice(&deviations).ok_or_else(|| {
                        DssError::data(format!(
                            "robust scaling could not compute MAD for feature '{name}'"
                        ))
                    })?;
                    (
                        median,
                        (mad * DEFAULT_NORMAL_CONSISTENCY).max(DEFAULT_MAD_EPSILON),
                    )
                }
            };
            let scale = if scale.is_finite() && scale > 0.0 {
                scale
            } else {
                1.0
            };
            params.insert(name.clone(), (center, scale));
        }
        Ok(Self { kind, params })
    }

    /// Rescales every fitted feature; windows are rebuilt, never mutated.
    pub fn transform(&self, dataset: &WindowDataset) -> DssResult<WindowDataset> {
        let mut out =
            WindowDataset::new(dataset.feature_names().to_vec(), dataset.target_names().to_vec());
        for window in dataset.windows() {
            out.push(self.transform_window(window)?)?;
        }
        Ok(out)
    }

    pub fn transform_window(&self, window: &Window) -> DssResult<Window> {
        let features = window
            .features()
            .iter()
            .map(|(name, values)| {
                let scaled = match self.params.get(name) {
                    Some(&(center, scale)) => values.iter().map(|v| (v - center) / scale).collect(),
                    None => values.clone(),
                };
                (name.clone(), scaled)
            })
            .collect();
        Window::new(
            window.series_id(),
            window.start(),
            window.len(),
            window.steps().to_vec(),
            features,
            window.state().to_vec(),
            window.targets().clone(),
        )
    }
}
