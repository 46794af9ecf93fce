// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::PretrainingSpec;
use dss_core::{DssError, DssResult, SeriesTable, WindowDataset};
use dss_eval::{Fold, train_test_split};
use dss_preprocess::{FittedScaler, materialize_windows};
use std::collections::BTreeSet;
use tracing::info;

/// Scaled training data plus everything needed to prepare more windows the
/// same way.
#[derive(Clone, Debug)]
pub struct PretrainedData {
    pub train: WindowDataset,
    /// `None` when `test_size` is zero or too few series exist to split.
    pub valid: Option<WindowDataset>,
    pub scaler: FittedScaler,
    pub split: Fold,
}

impl PretrainedData {
    /// Windows of another table, downsampled and scaled like the training set.
    pub fn prepare(&self, spec: &PretrainingSpec, table: &SeriesTable) -> DssResult<WindowDataset> {
        prepare_windows(spec, &self.scaler, table)
    }
}

/// Downsampled windows of `table` scaled with an already fitted scaler.
pub fn prepare_windows(
    spec: &PretrainingSpec,
    scaler: &FittedScaler,
    table: &SeriesTable,
) -> DssResult<WindowDataset> {
    let windows = materialize_windows(table, &spec.downsample)?;
    scaler.transform(&windows)
}

fn select(table: &SeriesTable, ids: &[String]) -> SeriesTable {
    let ids: BTreeSet<String> = ids.iter().cloned().collect();
    table.select(&ids)
}

/// Splits series into train and validation, materializes windows and fits
/// the scaler on the training windows only.
///
/// `holdout` overrides `spec.test_size`; full retraining passes `Some(0.0)`.
pub fn pretrain(
    table: &SeriesTable,
    spec: &PretrainingSpec,
    holdout: Option<f64>,
    seed: u64,
) -> DssResult<PretrainedData> {
    split_and_scale(table, spec, holdout, seed, None)
}

/// Same split as [`pretrain`], scaled with `scaler` instead of refitting.
///
/// Restored models see their features on the scale they were trained on.
pub fn pretrain_with_scaler(
    table: &SeriesTable,
    spec: &PretrainingSpec,
    holdout: Option<f64>,
    seed: u64,
    scaler: FittedScaler,
) -> DssResult<PretrainedData> {
    split_and_scale(table, spec, holdout, seed, Some(scaler))
}

fn split_and_scale(
    table: &SeriesTable,
    spec: &PretrainingSpec,
    holdout: Option<f64>,
    seed: u64,
    fitted: Option<FittedScaler>,
) -> DssResult<PretrainedData> {
    if table.is_empty() {
        return Err(DssError::data("pretraining needs at least one series"));
    }
    let test_size = holdout.unwrap_or(spec.test_size);
    let split = train_test_split(&table.series_ids(), test_size, seed)?;

    let train_raw = materialize_windows(&select(table, &split.train), &spec.downsample)?;
    if train_raw.is_empty() {
        return Err(DssError::data(
            "pretraining produced no training windows; series may be shorter than window_size",
        ));
    }
    let scaler = match fitted {
        Some(scaler) => scaler,
        None => FittedScaler::fit(spec.scaler.kind, &train_raw)?,
    };
    let train = scaler.transform(&train_raw)?;
    let valid = if split.test.is_empty() {
        None
    } else {
        let windows = materialize_windows(&select(table, &split.test), &spec.downsample)?;
        Some(scaler.transform(&windows)?).filter(|valid| !valid.is_empty())
    };

    info!(
        train_series = split.train.len(),
        valid_series = split.test.len(),
        train_windows = train.len(),
        valid_windows = valid.as_ref().map_or(0, WindowDataset::len),
        "pretraining done"
    );
    Ok(PretrainedData {
        train,
        valid,
        scaler,
        split,
    })
}
