// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::Configuration;
use crate::pretrain::{PretrainedData, pretrain};
use dss_core::{
    DssError, DssResult, EventTable, ExecutionContext, PredictionStream, SeriesTable,
    WindowDataset, derive_seed,
};
use dss_eval::{DEFAULT_TOLERANCES, EventApReport, event_detection_ap, extract_events, mse};
use dss_models::{Model, ModelRegistry, ModelStore, TrainSummary};
use dss_preprocess::FittedScaler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Minimum step distance between two extracted events of one kind; equal to
/// the tightest scoring tolerance.
pub const EVENT_PEAK_DISTANCE: u64 = DEFAULT_TOLERANCES[0];

/// One ensemble member, trained or restored.
pub struct TrainedModel {
    pub name: String,
    pub model: Box<dyn Model>,
    /// `None` for models restored from the store.
    pub summary: Option<TrainSummary>,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("name", &self.name)
            .field("model_type", &self.model.model_type())
            .field("summary", &self.summary)
            .finish()
    }
}

/// Fits every ensemble member on `data`, in ensemble order.
pub fn train_models(
    config: &Configuration,
    registry: &ModelRegistry,
    data: &PretrainedData,
    ctx: &ExecutionContext<'_>,
) -> DssResult<Vec<TrainedModel>> {
    let mut trained = Vec::with_capacity(config.ensemble.models().len());
    for (index, name) in config.ensemble.models().iter().enumerate() {
        ctx.check_cancelled()?;
        let spec = config.models.get(name).ok_or_else(|| {
            DssError::config(
                format!("ensemble.models[{index}]"),
                format!("model '{name}' is not declared under models"),
            )
        })?;
        let mut model = registry.build(spec)?;
        let model_ctx = ctx.with_seed(derive_seed(ctx.seed, name, index as u64));
        let summary = model.fit(&data.train, data.valid.as_ref(), &model_ctx)?;
        info!(
            model = %name,
            epochs = summary.epochs_run,
            best_loss = summary.best_loss,
            "model trained"
        );
        trained.push(TrainedModel {
            name: name.clone(),
            model,
            summary: Some(summary),
        });
    }
    Ok(trained)
}

/// Saves every model under `<store>/<store_name>-<model hash>.json`.
pub fn save_models(
    config: &Configuration,
    store: &ModelStore,
    trained: &[TrainedModel],
    prefix: &str,
) -> DssResult<Vec<std::path::PathBuf>> {
    trained
        .iter()
        .map(|member| {
            let hash = config.model_hash(&member.name)?;
            let artifact = member.model.to_artifact()?;
            store.save(&format!("{prefix}{}", member.name), &hash, &artifact)
        })
        .collect()
}

/// Store name of the scaler fitted alongside the models.
pub const SCALER_ARTIFACT: &str = "scaler";

/// Saves the scaler the models were trained behind, so prediction can scale
/// new data with the training statistics.
pub fn save_scaler(
    config: &Configuration,
    store: &ModelStore,
    scaler: &FittedScaler,
    prefix: &str,
) -> DssResult<std::path::PathBuf> {
    store.save_document(&format!("{prefix}{SCALER_ARTIFACT}"), &config.scaler_hash()?, scaler)
}

pub fn load_scaler(config: &Configuration, store: &ModelStore) -> DssResult<FittedScaler> {
    let hash = config.scaler_hash()?;
    let scaler: FittedScaler = store.load_document(SCALER_ARTIFACT, &hash)?;
    if scaler.kind != config.pretraining.scaler.kind {
        return Err(DssError::data(format!(
            "stored scaler '{SCALER_ARTIFACT}-{hash}' is {:?}, configuration asks for {:?}",
            scaler.kind, config.pretraining.scaler.kind
        )));
    }
    info!(hash = %hash, features = scaler.params.len(), "scaler restored");
    Ok(scaler)
}

/// Restores every ensemble member from the store, for prediction-only runs.
pub fn load_models(
    config: &Configuration,
    registry: &ModelRegistry,
    store: &ModelStore,
) -> DssResult<Vec<TrainedModel>> {
    config
        .ensemble
        .models()
        .iter()
        .map(|name| {
            let hash = config.model_hash(name)?;
            let artifact = store.load(name, &hash)?;
            let model = registry.restore(&artifact)?;
            info!(model = %name, hash = %hash, "model restored");
            Ok(TrainedModel {
                name: name.clone(),
                model,
                summary: None,
            })
        })
        .collect()
}

/// Predicts with every member and combines the streams.
pub fn predict_ensemble(
    config: &Configuration,
    trained: &[TrainedModel],
    windows: &WindowDataset,
) -> DssResult<PredictionStream> {
    let streams: Vec<PredictionStream> = trained
        .iter()
        .map(|member| member.model.predict(windows))
        .collect::<DssResult<_>>()?;
    config.ensemble.combine(&streams)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Mean event AP over the event kinds that have ground truth.
    pub score: f64,
    pub event_ap: EventApReport,
    /// Over rows where both prediction and target are present.
    pub mse: Option<f64>,
    pub events_predicted: usize,
    pub eval_series: usize,
}

/// Scores an ensemble stream against the events of the evaluated series.
pub fn score_stream(
    config: &Configuration,
    stream: &PredictionStream,
    windows: &WindowDataset,
    events: &EventTable,
) -> DssResult<ScoreReport> {
    let series: BTreeSet<&str> = windows.windows().iter().map(|w| w.series_id()).collect();
    let truth = events.select(series.iter().copied());
    let threshold = config
        .ensemble
        .models()
        .iter()
        .filter_map(|name| config.models.get(name))
        .map(|spec| spec.threshold)
        .fold(f64::INFINITY, f64::min);
    let threshold = if threshold.is_finite() { threshold } else { 0.0 };
    let predicted = extract_events(stream, threshold, EVENT_PEAK_DISTANCE)?;
    let event_ap = event_detection_ap(&predicted, &truth, &DEFAULT_TOLERANCES)?;

    let (pred, target) = aligned_targets(stream, windows);
    let mse = if pred.is_empty() {
        None
    } else {
        Some(mse(&pred, &target)?)
    };
    Ok(ScoreReport {
        score: event_ap.score,
        event_ap,
        mse,
        events_predicted: predicted.len(),
        eval_series: series.len(),
    })
}

/// Prediction/target pairs in stream order, skipping NaN on either side.
fn aligned_targets(stream: &PredictionStream, windows: &WindowDataset) -> (Vec<f64>, Vec<f64>) {
    let mut pred = Vec::new();
    let mut target = Vec::new();
    let mut row = 0;
    for window in windows.windows() {
        for window_row in 0..window.rows() {
            if row >= stream.rows() {
                return (pred, target);
            }
            for (channel_idx, channel) in stream.channels().iter().enumerate() {
                let Some(values) = window.target(channel) else {
                    continue;
                };
                let (p, t) = (stream.row(row)[channel_idx], values[window_row]);
                if !p.is_nan() && !t.is_nan() {
                    pred.push(p);
                    target.push(t);
                }
            }
            row += 1;
        }
    }
    (pred, target)
}

fn select(table: &SeriesTable, ids: &[String]) -> SeriesTable {
    let ids: BTreeSet<String> = ids.iter().cloned().collect();
    table.select(&ids)
}

/// The atomic unit repeated by CV and HPO: pretrain on `train_ids`, train
/// the ensemble, predict `test_ids` and score.
///
/// Reads only its arguments and writes nothing outside its return value.
pub fn score_split(
    config: &Configuration,
    registry: &ModelRegistry,
    processed: &SeriesTable,
    events: &EventTable,
    train_ids: &[String],
    test_ids: &[String],
    ctx: &ExecutionContext<'_>,
) -> DssResult<ScoreReport> {
    let data = pretrain(&select(processed, train_ids), &config.pretraining, None, ctx.seed)?;
    let trained = train_models(config, registry, &data, ctx)?;
    let eval = data.prepare(&config.pretraining, &select(processed, test_ids))?;
    if eval.is_empty() {
        warn!(series = test_ids.len(), "no evaluation windows for held-out series");
        return Err(DssError::data("held-out series produced no windows to score"));
    }
    let stream = predict_ensemble(config, &trained, &eval)?;
    score_stream(config, &stream, &eval, events)
}
