// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::spec::ModelSpec;
use dss_core::{
    DssError, DssResult, ExecutionContext, PredictionStream, RowKey, StateLabel, WindowDataset,
};
use serde::{Deserialize, Serialize};

/// Outcome of one training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    /// Best monitored loss: validation loss when a validation split exists,
    /// training loss otherwise.
    pub best_loss: f64,
    pub train_losses: Vec<f64>,
    pub valid_losses: Vec<f64>,
    pub stopped_early: bool,
}

/// Serializable trained state, as written by the model store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_type: String,
    pub spec: ModelSpec,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    pub state: serde_json::Value,
}

/// A trainable sequence model.
///
/// `predict` returns one row per downsampled window row, in window order,
/// with one channel per training target.
pub trait Model: Send + Sync {
    fn model_type(&self) -> &'static str;

    fn spec(&self) -> &ModelSpec;

    fn fit(
        &mut self,
        train: &WindowDataset,
        valid: Option<&WindowDataset>,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<TrainSummary>;

    fn predict(&self, windows: &WindowDataset) -> DssResult<PredictionStream>;

    fn to_artifact(&self) -> DssResult<ModelArtifact>;
}

/// Flattened `(features, targets)` rows of a window dataset.
#[derive(Clone, Debug, Default)]
pub(crate) struct Rows {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
}

impl Rows {
    /// Collects training rows; NaN features read as zero and rows with a NaN
    /// target are skipped. With `mask_unlabeled`, unlabeled rows are skipped.
    pub fn collect(dataset: &WindowDataset, mask_unlabeled: bool) -> DssResult<Self> {
        let feature_names = dataset.feature_names();
        let target_names = dataset.target_names();
        let mut rows = Self::default();
        for window in dataset.windows() {
            for row in 0..window.rows() {
                if mask_unlabeled && window.state()[row] == StateLabel::Unlabeled {
                    continue;
                }
                let targets = target_row(window, row, target_names)?;
                if targets.iter().any(|v| v.is_nan()) {
                    continue;
                }
                let features = window
                    .feature_row(row, feature_names)?
                    .into_iter()
                    .map(|v| if v.is_nan() { 0.0 } else { v })
                    .collect();
                rows.features.push(features);
                rows.targets.push(targets);
            }
        }
        Ok(rows)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn target_row(window: &dss_core::Window, row: usize, names: &[String]) -> DssResult<Vec<f64>> {
    names
        .iter()
        .map(|name| {
            window
                .target(name)
                .and_then(|values| values.get(row).copied())
                .ok_or_else(|| {
                    DssError::data(format!(
                        "window '{}'@{} has no target '{name}' at row {row}",
                        window.series_id(),
                        window.start()
                    ))
                })
        })
        .collect()
}

/// Builds a prediction stream by evaluating `predict_row` on every window row.
pub(crate) fn predict_rows(
    windows: &WindowDataset,
    channels: &[String],
    mut predict_row: impl FnMut(&[f64]) -> Vec<f64>,
) -> DssResult<PredictionStream> {
    let feature_names = windows.feature_names();
    let mut values = Vec::with_capacity(windows.total_rows() * channels.len());
    let mut keys = Vec::with_capacity(windows.total_rows());
    for window in windows.windows() {
        for (row, &step) in window.steps().iter().enumerate() {
            let features: Vec<f64> = window
                .feature_row(row, feature_names)?
                .into_iter()
                .map(|v| if v.is_nan() { 0.0 } else { v })
                .collect();
            values.extend(predict_row(&features));
            keys.push(RowKey {
                series_id: window.series_id().to_string(),
                step,
            });
        }
    }
    PredictionStream::new(channels.to_vec(), values)?.with_keys(keys)
}

/// Checks that a dataset matches the schema a model was trained on.
pub(crate) fn check_schema(
    windows: &WindowDataset,
    feature_names: &[String],
    model_type: &str,
) -> DssResult<()> {
    if windows.feature_names() != feature_names {
        return Err(DssError::data(format!(
            "model '{model_type}' was trained on features [{}] but got [{}]",
            feature_names.join(", "),
            windows.feature_names().join(", ")
        )));
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
