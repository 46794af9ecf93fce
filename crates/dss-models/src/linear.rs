// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::{Model, ModelArtifact, Rows, TrainSummary, check_schema, predict_rows, sigmoid};
use crate::spec::{LossKind, ModelSpec, OptimizerKind};
use crate::trainer::{EpochLearner, EpochTrainer};
use dss_core::{DssError, DssResult, ExecutionContext, PredictionStream, WindowDataset, derive_seed};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const LINEAR_MODEL: &str = "linear";

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1.0e-8;
const INIT_SCALE: f64 = 0.01;
const BCE_CLAMP: f64 = 1.0e-7;

/// Per-target weights; the last entry of each row is the bias.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    pub weights: Vec<Vec<f64>>,
}

impl LinearWeights {
    fn output(&self, target: usize, features: &[f64], loss: LossKind) -> f64 {
        let w = &self.weights[target];
        let (bias, coefs) = w.split_last().map_or((0.0, &[][..]), |(b, c)| (*b, c));
        let z = coefs.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + bias;
        match loss {
            LossKind::Mse => z,
            LossKind::Bce => sigmoid(z),
        }
    }
}

/// Row-wise linear model over the downsampled features.
#[derive(Clone, Debug)]
pub struct LinearModel {
    spec: ModelSpec,
    feature_names: Vec<String>,
    target_names: Vec<String>,
    params: LinearWeights,
}

impl LinearModel {
    pub fn new(spec: &ModelSpec) -> DssResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec: spec.clone(),
            feature_names: vec![],
            target_names: vec![],
            params: LinearWeights::default(),
        })
    }

    pub fn from_artifact(artifact: &ModelArtifact) -> DssResult<Self> {
        let params: LinearWeights = serde_json::from_value(artifact.state.clone())
            .map_err(|err| DssError::json("decoding linear model state", err))?;
        let width = artifact.feature_names.len() + 1;
        if params.weights.len() != artifact.target_names.len()
            || params.weights.iter().any(|w| w.len() != width)
        {
            return Err(DssError::data(
                "linear model state does not match its feature/target schema",
            ));
        }
        Ok(Self {
            spec: artifact.spec.clone(),
            feature_names: artifact.feature_names.clone(),
            target_names: artifact.target_names.clone(),
            params,
        })
    }

    pub fn weights(&self) -> &LinearWeights {
        &self.params
    }
}

impl Model for LinearModel {
    fn model_type(&self) -> &'static str {
        LINEAR_MODEL
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
        if train.target_names().is_empty() {
            return Err(DssError::training("linear model needs at least one target"));
        }
        let rows = Rows::collect(train, self.spec.mask_unlabeled)?;
        if rows.is_empty() {
            return Err(DssError::training("no labeled training rows"));
        }
        let valid_rows = match valid {
            Some(valid) if !valid.is_empty() => {
                check_schema(valid, train.feature_names(), LINEAR_MODEL)?;
                Some(Rows::collect(valid, self.spec.mask_unlabeled)?).filter(|r| !r.is_empty())
            }
            _ => None,
        };

        let mut rng = StdRng::seed_from_u64(derive_seed(ctx.seed, "model:linear", 0));
        let width = train.feature_names().len() + 1;
        let weights = (0..train.target_names().len())
            .map(|_| {
                (0..width)
                    .map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE))
                    .collect()
            })
            .collect();

        let mut learner = LinearLearner {
            spec: &self.spec,
            params: LinearWeights { weights },
            train: rows,
            valid: valid_rows,
            rng,
            adam: AdamState::new(train.target_names().len(), width),
        };
        let summary = EpochTrainer::new(LINEAR_MODEL, &self.spec).run(&mut learner, ctx)?;

        self.feature_names = train.feature_names().to_vec();
        self.target_names = train.target_names().to_vec();
        self.params = learner.params;
        info!(
            model = LINEAR_MODEL,
            epochs = summary.epochs_run,
            best_epoch = summary.best_epoch,
            best_loss = summary.best_loss,
            "training finished"
        );
        Ok(summary)
    }

    fn predict(&self, windows: &WindowDataset) -> DssResult<PredictionStream> {
        if self.params.weights.is_empty() {
            return Err(DssError::training("linear model has not been trained"));
        }
        check_schema(windows, &self.feature_names, LINEAR_MODEL)?;
        let loss = self.spec.loss;
        predict_rows(windows, &self.target_names, |features| {
            (0..self.target_names.len())
                .map(|t| self.params.output(t, features, loss))
                .collect()
        })
    }

    fn to_artifact(&self) -> DssResult<ModelArtifact> {
        Ok(ModelArtifact {
            model_type: LINEAR_MODEL.to_string(),
            spec: self.spec.clone(),
            feature_names: self.feature_names.clone(),
            target_names: self.target_names.clone(),
            state: serde_json::to_value(&self.params)
                .map_err(|err| DssError::json("encoding linear model state", err))?,
        })
    }
}

#[derive(Clone, Debug)]
struct AdamState {
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    step: i32,
}

impl AdamState {
    fn new(targets: usize, width: usize) -> Self {
        Self {
            m: vec![vec![0.0; width]; targets],
            v: vec![vec![0.0; width]; targets],
            step: 0,
        }
    }
}

struct LinearLearner<'s> {
    spec: &'s ModelSpec,
    params: LinearWeights,
    train: Rows,
    valid: Option<Rows>,
    rng: StdRng,
    adam: AdamState,
}

impl LinearLearner<'_> {
    fn row_loss(&self, features: &[f64], targets: &[f64]) -> f64 {
        targets
            .iter()
            .enumerate()
            .map(|(t, &y)| {
                let out = self.params.output(t, features, self.spec.loss);
                match self.spec.loss {
                    LossKind::Mse => (out - y) * (out - y),
                    LossKind::Bce => {
                        let p = out.clamp(BCE_CLAMP, 1.0 - BCE_CLAMP);
                        -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                    }
                }
            })
            .sum::<f64>()
            / targets.len() as f64
    }

    fn mean_loss(&self, rows: &Rows) -> f64 {
        let total: f64 = rows
            .features
            .iter()
            .zip(&rows.targets)
            .map(|(x, y)| self.row_loss(x, y))
            .sum();
        total / rows.len() as f64
    }

    fn apply_gradient(&mut self, grad: &[Vec<f64>], lr: f64) {
        match self.spec.optimizer {
            OptimizerKind::Sgd => {
                for (w, g) in self.params.weights.iter_mut().zip(grad) {
                    for (wi, gi) in w.iter_mut().zip(g) {
                        *wi -= lr * gi;
                    }
                }
            }
            OptimizerKind::Adam => {
                self.adam.step += 1;
                let b1 = 1.0 - ADAM_BETA1.powi(self.adam.step);
                let b2 = 1.0 - ADAM_BETA2.powi(self.adam.step);
                for (t, g) in grad.iter().enumerate() {
                    for (i, gi) in g.iter().enumerate() {
                        let m = &mut self.adam.m[t][i];
                        let v = &mut self.adam.v[t][i];
                        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * gi;
                        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * gi * gi;
                        let m_hat = *m / b1;
                        let v_hat = *v / b2;
                        self.params.weights[t][i] -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                    }
                }
            }
        }
    }
}

impl EpochLearner for LinearLearner<'_> {
    type Snapshot = LinearWeights;

    fn train_epoch(&mut self, _epoch: usize, lr: f64) -> DssResult<f64> {
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        order.shuffle(&mut self.rng);
        let targets = self.params.weights.len();
        let width = self.params.weights.first().map_or(1, Vec::len);

        let mut total = 0.0;
        for batch in order.chunks(self.spec.batch_size) {
            let mut grad = vec![vec![0.0; width]; targets];
            for &idx in batch {
                let x = &self.train.features[idx];
                let y = &self.train.targets[idx];
                total += self.row_loss(x, y);
                for (t, &yt) in y.iter().enumerate() {
                    let out = self.params.output(t, x, self.spec.loss);
                    let dz = match self.spec.loss {
                        LossKind::Mse => 2.0 * (out - yt),
                        LossKind::Bce => out - yt,
                    } / (batch.len() * targets) as f64;
                    for (g, xi) in grad[t].iter_mut().zip(x) {
                        *g += dz * xi;
                    }
                    if let Some(bias) = grad[t].last_mut() {
                        *bias += dz;
                    }
                }
            }
            self.apply_gradient(&grad, lr);
        }
        Ok(total / self.train.len() as f64)
    }

    fn validation_loss(&self) -> DssResult<Option<f64>> {
        Ok(self.valid.as_ref().map(|rows| self.mean_loss(rows)))
    }

    fn snapshot(&self) -> LinearWeights {
        self.params.clone()
    }

    fn restore(&mut self, snapshot: LinearWeights) {
        self.params = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::LinearModel;
    use crate::model::Model;
    use crate::spec::{LossKind, ModelSpec};
    use dss_core::{ExecutionContext, StateLabel, Window, WindowDataset};
    use std::collections::BTreeMap;

    fn dataset(xs: &[f64], slope: f64, bias: f64) -> WindowDataset {
        let n = xs.len();
        let mut features = BTreeMap::new();
        features.insert("f_x".to_string(), xs.to_vec());
        let mut targets = BTreeMap::new();
        targets.insert(
            "event_onset".to_string(),
            xs.iter().map(|x| slope * x + bias).collect(),
        );
        let window = Window::new(
            "s",
            0,
            n,
            (0..n as u64).collect(),
            features,
            vec![StateLabel::Awake; n],
            targets,
        )
        .expect("window should be valid");
        let mut data = WindowDataset::new(vec!["f_x".into()], vec!["event_onset".into()]);
        data.push(window).expect("window should fit");
        data
    }

    #[test]
    fn learns_a_linear_relation() {
        let xs: Vec<f64> = (0..64).map(|v| v as f64 / 32.0 - 1.0).collect();
        let data = dataset(&xs, 0.5, 0.25);
        let mut spec = ModelSpec::new("linear");
        spec.epochs = 200;
        spec.lr = 0.05;
        spec.batch_size = 8;
        let mut model = LinearModel::new(&spec).expect("spec should be valid");
        let summary = model
            .fit(&data, None, &ExecutionContext::new())
            .expect("training should succeed");
        assert!(summary.best_loss < 1e-3, "loss={}", summary.best_loss);

        let preds = model.predict(&data).expect("prediction should succeed");
        assert_eq!(preds.rows(), 64);
        assert_eq!(preds.channels(), &["event_onset".to_string()]);
        assert!((preds.values()[63] - (0.5 * xs[63] + 0.25)).abs() < 0.05);
        assert_eq!(preds.keys()[3].step, 3);
    }

    #[test]
    fn training_is_seeded() {
        let xs: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let data = dataset(&xs, 0.1, 0.0);
        let mut spec = ModelSpec::new("linear");
        spec.loss = LossKind::Bce;
        spec.epochs = 3;
        let fit = |seed| {
            let mut model = LinearModel::new(&spec).expect("spec should be valid");
            model
                .fit(&data, None, &ExecutionContext::new().with_seed(seed))
                .expect("training should succeed");
            model.weights().clone()
        };
        assert_eq!(fit(7), fit(7));
        assert_ne!(fit(7), fit(8));
    }

    #[test]
    fn artifact_restores_predictions() {
        let xs: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let data = dataset(&xs, 1.0, 0.0);
        let mut spec = ModelSpec::new("linear");
        spec.epochs = 2;
        let mut model = LinearModel::new(&spec).expect("spec should be valid");
        model
            .fit(&data, None, &ExecutionContext::new())
            .expect("training should succeed");
        let restored = LinearModel::from_artifact(&model.to_artifact().expect("artifact"))
            .expect("artifact should restore");
        assert_eq!(
            restored.predict(&data).expect("restored prediction"),
            model.predict(&data).expect("prediction")
        );
    }

    #[test]
    fn untrained_model_refuses_to_predict() {
        let model = LinearModel::new(&ModelSpec::new("linear")).expect("spec should be valid");
        assert!(model.predict(&dataset(&[1.0], 1.0, 0.0)).is_err());
    }
}
