// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Weighted combination of per-model prediction streams.

use dss_core::{DssError, DssResult, PredictionStream};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rule used to merge aligned model outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMethod {
    /// Weighted sum; weights need not sum to one.
    #[default]
    Addition,
    /// Weighted sum divided by the sum of weights.
    WeightedAverage,
    /// Element-wise maximum; weights are ignored.
    Max,
    /// Per-row categorical vote, one-hot output.
    WeightedMajorityVote,
}

impl CombinationMethod {
    pub const ALL: [CombinationMethod; 4] = [
        CombinationMethod::Addition,
        CombinationMethod::WeightedAverage,
        CombinationMethod::Max,
        CombinationMethod::WeightedMajorityVote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Addition => "addition",
            Self::WeightedAverage => "weighted_average",
            Self::Max => "max",
            Self::WeightedMajorityVote => "weighted_majority_vote",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnsembleSpec {
    models: Vec<String>,
    #[serde(default)]
    weights: Option<Vec<f64>>,
    #[serde(default)]
    comb_method: CombinationMethod,
    #[serde(default)]
    pred_only: bool,
}

/// Ordered model names with one weight each.
///
/// Construction fails whenever the model and weight counts differ, both
/// through [`EnsembleSpec::new`] and through deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnsembleSpec")]
pub struct EnsembleSpec {
    models: Vec<String>,
    weights: Vec<f64>,
    comb_method: CombinationMethod,
    /// Skip training and predict with stored models only.
    pred_only: bool,
}

impl TryFrom<RawEnsembleSpec> for EnsembleSpec {
    type Error = DssError;

    fn try_from(raw: RawEnsembleSpec) -> Result<Self, Self::Error> {
        let weights = raw.weights.unwrap_or_else(|| vec![1.0; raw.models.len()]);
        Self::new(raw.models, weights, raw.comb_method).map(|spec| spec.with_pred_only(raw.pred_only))
    }
}

impl EnsembleSpec {
    pub fn new(
        models: Vec<String>,
        weights: Vec<f64>,
        comb_method: CombinationMethod,
    ) -> DssResult<Self> {
        if models.is_empty() {
            return Err(DssError::config("ensemble.models", "must name at least one model"));
        }
        if let Some(idx) = models.iter().position(|m| m.trim().is_empty()) {
            return Err(DssError::config(
                format!("ensemble.models[{idx}]"),
                "must be non-empty",
            ));
        }
        if models.len() != weights.len() {
            return Err(DssError::config(
                "ensemble.weights",
                format!(
                    "{} weights given for {} models",
                    weights.len(),
                    models.len()
                ),
            ));
        }
        if let Some(idx) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(DssError::config(
                format!("ensemble.weights[{idx}]"),
                format!("must be finite and >= 0, got {}", weights[idx]),
            ));
        }
        if comb_method == CombinationMethod::WeightedAverage && weights.iter().sum::<f64>() <= 0.0
        {
            return Err(DssError::config(
                "ensemble.weights",
                "weighted_average needs a positive weight sum",
            ));
        }
        Ok(Self {
            models,
            weights,
            comb_method,
            pred_only: false,
        })
    }

    /// Single-model ensemble with unit weight.
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            models: vec![model.into()],
            weights: vec![1.0],
            comb_method: CombinationMethod::Addition,
            pred_only: false,
        }
    }

    pub fn with_pred_only(mut self, pred_only: bool) -> Self {
        self.pred_only = pred_only;
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn comb_method(&self) -> CombinationMethod {
        self.comb_method
    }

    pub fn pred_only(&self) -> bool {
        self.pred_only
    }

    /// Combines one stream per model, in model order.
    pub fn combine(&self, streams: &[PredictionStream]) -> DssResult<PredictionStream> {
        if streams.len() != self.models.len() {
            return Err(DssError::shape_mismatch(
                "ensemble streams (one per model)",
                self.models.len(),
                streams.len(),
            ));
        }
        let first = &streams[0];
        for (stream, name) in streams.iter().zip(&self.models).skip(1) {
            if stream.len() != first.len() {
                return Err(DssError::shape_mismatch(
                    format!("ensemble stream of model '{name}'"),
                    first.len(),
                    stream.len(),
                ));
            }
            if stream.channels() != first.channels() {
                return Err(DssError::data(format!(
                    "ensemble stream of model '{name}' has channels [{}], expected [{}]",
                    stream.channels().join(", "),
                    first.channels().join(", ")
                )));
            }
        }

        let values = match self.comb_method {
            CombinationMethod::Addition => self.weighted_sum(streams),
            CombinationMethod::WeightedAverage => {
                let total: f64 = self.weights.iter().sum();
                self.weighted_sum(streams)
                    .into_iter()
                    .map(|v| v / total)
                    .collect()
            }
            CombinationMethod::Max => (0..first.len())
                .map(|i| {
                    streams
                        .iter()
                        .map(|s| s.values()[i])
                        .fold(f64::NEG_INFINITY, f64::max)
                })
                .collect(),
            CombinationMethod::WeightedMajorityVote => self.majority_vote(streams),
        };
        debug!(
            method = self.comb_method.as_str(),
            models = self.models.len(),
            rows = first.rows(),
            "ensemble combined"
        );
        first.with_values(values)
    }

    fn weighted_sum(&self, streams: &[PredictionStream]) -> Vec<f64> {
        let mut out = vec![0.0; streams[0].len()];
        for (stream, weight) in streams.iter().zip(&self.weights) {
            for (acc, v) in out.iter_mut().zip(stream.values()) {
                *acc += weight * v;
            }
        }
        out
    }

    /// Each model votes for its argmax channel per row (single-channel
    /// streams vote `v >= 0.5`); the channel with the most weight wins and
    /// ties go to the lowest channel index.
    fn majority_vote(&self, streams: &[PredictionStream]) -> Vec<f64> {
        let first = &streams[0];
        let width = first.channels().len();
        let classes = width.max(2);
        let mut out = Vec::with_capacity(first.len());
        for row in 0..first.rows() {
            let mut tally = vec![0.0; classes];
            for (stream, weight) in streams.iter().zip(&self.weights) {
                let values = stream.row(row);
                let vote = if width == 1 {
                    usize::from(values[0] >= 0.5)
                } else {
                    argmax(values)
                };
                tally[vote] += weight;
            }
            let winner = argmax(&tally);
            if width == 1 {
                out.push(if winner == 1 { 1.0 } else { 0.0 });
            } else {
                out.extend((0..width).map(|c| if c == winner { 1.0 } else { 0.0 }));
            }
        }
        out
    }
}

/// Index of the first maximum; NaN never wins.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, v) in values.iter().enumerate() {
        if *v > values[best] || (values[best].is_nan() && !v.is_nan()) {
            best = idx;
        }
    }
    best
}
