// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::{Model, ModelArtifact, Rows, TrainSummary, predict_rows};
use crate::spec::ModelSpec;
use dss_core::{DssError, DssResult, ExecutionContext, PredictionStream, WindowDataset};
use serde::{Deserialize, Serialize};

pub const MEAN_BASELINE_MODEL: &str = "mean-baseline";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct BaselineState {
    means: Vec<f64>,
}

/// Predicts the training mean of every target on every row.
#[derive(Clone, Debug)]
pub struct MeanBaseline {
    spec: ModelSpec,
    feature_names: Vec<String>,
    target_names: Vec<String>,
    state: BaselineState,
}

impl MeanBaseline {
    pub fn new(spec: &ModelSpec) -> DssResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec: spec.clone(),
            feature_names: vec![],
            target_names: vec![],
            state: BaselineState::default(),
        })
    }

    pub fn from_artifact(artifact: &ModelArtifact) -> DssResult<Self> {
        let state: BaselineState = serde_json::from_value(artifact.state.clone())
            .map_err(|err| DssError::json("decoding mean-baseline state", err))?;
        if state.means.len() != artifact.target_names.len() {
            return Err(DssError::shape_mismatch(
                "mean-baseline state",
                artifact.target_names.len(),
                state.means.len(),
            ));
        }
        Ok(Self {
            spec: artifact.spec.clone(),
            feature_names: artifact.feature_names.clone(),
            target_names: artifact.target_names.clone(),
            state,
        })
    }

    pub fn means(&self) -> &[f64] {
        &self.state.means
    }
}

fn mean_squared_error(rows: &Rows, means: &[f64]) -> f64 {
    let total: f64 = rows
        .targets
        .iter()
        .map(|y| {
            y.iter()
                .zip(means)
                .map(|(v, m)| (v - m) * (v - m))
                .sum::<f64>()
                / means.len() as f64
        })
        .sum();
    total / rows.len() as f64
}

impl Model for MeanBaseline {
    fn model_type(&self) -> &'static str {
        MEAN_BASELINE_MODEL
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn fit(
        &mut self,
        train: &WindowDataset,
        valid: Option<&WindowDataset>,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<TrainSummary> {
        ctx.check_cancelled()?;
        let rows = Rows::collect(train, self.spec.mask_unlabeled)?;
        if rows.is_empty() {
            return Err(DssError::training("no labeled training rows"));
        }
        let targets = train.target_names().len();
        let mut means = vec![0.0; targets];
        for y in &rows.targets {
            for (m, v) in means.iter_mut().zip(y) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= rows.len() as f64;
        }

        let train_loss = mean_squared_error(&rows, &means);
        let valid_loss = match valid {
            Some(valid) if !valid.is_empty() => {
                let rows = Rows::collect(valid, self.spec.mask_unlabeled)?;
                (!rows.is_empty()).then(|| mean_squared_error(&rows, &means))
            }
            _ => None,
        };
        ctx.record_scalar("mean-baseline.train_loss", train_loss);

        self.feature_names = train.feature_names().to_vec();
        self.target_names = train.target_names().to_vec();
        self.state = BaselineState { means };
        Ok(TrainSummary {
            epochs_run: 1,
            best_epoch: 0,
            best_loss: valid_loss.unwrap_or(train_loss),
            train_losses: vec![train_loss],
            valid_losses: valid_loss.into_iter().collect(),
            stopped_early: false,
        })
    }

    fn predict(&self, windows: &WindowDataset) -> DssResult<PredictionStream> {
        if self.target_names.is_empty() {
            return Err(DssError::training("mean-baseline has not been trained"));
        }
        let means = self.state.means.clone();
        predict_rows(windows, &self.target_names, |_| means.clone())
    }

    fn to_artifact(&self) -> DssResult<ModelArtifact> {
        Ok(ModelArtifact {
            model_type: MEAN_BASELINE_MODEL.to_string(),
            spec: self.spec.clone(),
            feature_names: self.feature_names.clone(),
            target_names: self.target_names.clone(),
            state: serde_json::to_value(&self.state)
                .map_err(|err| DssError::json("encoding mean-baseline state", err))?,
        })
    }
}
