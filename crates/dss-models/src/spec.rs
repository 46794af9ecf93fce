// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    Mse,
    /// Binary cross-entropy on sigmoid outputs.
    Bce,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Cosine,
}

/// Per-epoch learning-rate schedule: linear warmup, then cosine cycles of
/// `t_initial` epochs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LrSchedule {
    #[serde(default)]
    pub kind: ScheduleKind,
    pub t_initial: usize,
    #[serde(default)]
    pub warmup: usize,
}

impl LrSchedule {
    pub fn learning_rate(&self, base: f64, epoch: usize) -> f64 {
        if epoch < self.warmup {
            return base * (epoch + 1) as f64 / (self.warmup + 1) as f64;
        }
        let t = ((epoch - self.warmup) % self.t_initial.max(1)) as f64;
        base * 0.5 * (1.0 + (PI * t / self.t_initial.max(1) as f64).cos())
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_epochs() -> usize {
    10
}

fn default_lr() -> f64 {
    1.0e-3
}

fn default_threshold() -> f64 {
    0.1
}

/// Hyperparameters of one configured model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default)]
    pub loss: LossKind,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default)]
    pub lr_schedule: Option<LrSchedule>,
    /// Epochs without improvement before stopping; zero disables.
    #[serde(default)]
    pub early_stopping: usize,
    #[serde(default)]
    pub mask_unlabeled: bool,
    /// Minimum predicted proximity for an event to be extracted.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub network_params: serde_json::Value,
}

impl ModelSpec {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            loss: LossKind::default(),
            optimizer: OptimizerKind::default(),
            lr: default_lr(),
            lr_schedule: None,
            early_stopping: 0,
            mask_unlabeled: false,
            threshold: default_threshold(),
            network_params: serde_json::Value::Null,
        }
    }

    pub fn validate(&self) -> DssResult<()> {
        if self.model_type.trim().is_empty() {
            return Err(DssError::config("type", "must be non-empty"));
        }
        if self.batch_size == 0 {
            return Err(DssError::config("batch_size", "must be >= 1"));
        }
        if self.epochs == 0 {
            return Err(DssError::config("epochs", "must be >= 1"));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(DssError::config(
                "lr",
                format!("must be finite and > 0, got {}", self.lr),
            ));
        }
        if let Some(schedule) = &self.lr_schedule
            && schedule.t_initial == 0
        {
            return Err(DssError::config("lr_schedule.t_initial", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DssError::config(
                "threshold",
                format!("must be within [0, 1], got {}", self.threshold),
            ));
        }
        if !(self.network_params.is_null() || self.network_params.is_object()) {
            return Err(DssError::config("network_params", "must be an object"));
        }
        Ok(())
    }

    pub fn learning_rate(&self, epoch: usize) -> f64 {
        match &self.lr_schedule {
            Some(schedule) => schedule.learning_rate(self.lr, epoch),
            None => self.lr,
        }
    }

    /// Returns a copy with one hyperparameter replaced.
    ///
    /// `param` is a top-level field such as `lr`, or `network_params.<key>`.
    pub fn with_override(&self, param: &str, value: &serde_json::Value) -> DssResult<Self> {
        let mut doc = serde_json::to_value(self)
            .map_err(|err| DssError::json("serializing model spec", err))?;
        let root = doc
            .as_object_mut()
            .ok_or_else(|| DssError::config(param, "model spec is not an object"))?;

        if let Some(key) = param.strip_prefix("network_params.") {
            let params = root
                .entry("network_params")
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if params.is_null() {
                *params = serde_json::Value::Object(serde_json::Map::new());
            }
            let Some(params) = params.as_object_mut() else {
                return Err(DssError::config("network_params", "must be an object"));
            };
            params.insert(key.to_string(), value.clone());
        } else {
            if param == "type" {
                return Err(DssError::config(param, "the model type cannot be searched"));
            }
            if !root.contains_key(param) {
                return Err(DssError::config(param, "unknown model hyperparameter"));
            }
            root.insert(param.to_string(), value.clone());
        }

        let spec: Self = serde_json::from_value(doc).map_err(|err| {
            DssError::config(param, format!("invalid override {value}: {err}"))
        })?;
        spec.validate().map_err(|err| match err {
            DssError::Config { message, .. } => DssError::config(param, message),
            other => other,
        })?;
        Ok(spec)
    }
}
