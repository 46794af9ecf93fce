// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DEFAULT_SEED, DssError, DssResult, Fingerprint};
use dss_ensemble::EnsembleSpec;
use dss_eval::{CvSpec, HpoSpec, split_param_key};
use dss_models::{ModelRegistry, ModelSpec};
use dss_preprocess::{DownsampleSpec, ScalerSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Raw wire form of one stage: `{"kind": "...", <params>...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl StageDescriptor {
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            params,
        }
    }

    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

fn default_test_size() -> f64 {
    0.2
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PretrainingSpec {
    pub downsample: DownsampleSpec,
    #[serde(default)]
    pub scaler: ScalerSpec,
    /// Fraction of series held out for validation and scoring.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
}

impl PretrainingSpec {
    pub fn validate(&self) -> DssResult<()> {
        self.downsample
            .validate()
            .map_err(|err| err.with_field_prefix("pretraining.downsample"))?;
        if !(self.test_size.is_finite() && (0.0..1.0).contains(&self.test_size)) {
            return Err(DssError::config(
                "pretraining.test_size",
                format!("must be in [0, 1), got {}", self.test_size),
            ));
        }
        Ok(())
    }
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_model_store_loc() -> PathBuf {
    PathBuf::from("tm")
}

/// The whole run, as one JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub preprocessing: Vec<StageDescriptor>,
    #[serde(default)]
    pub feature_engineering: Vec<StageDescriptor>,
    pub pretraining: PretrainingSpec,
    pub models: BTreeMap<String, ModelSpec>,
    pub ensemble: EnsembleSpec,
    #[serde(default)]
    pub hpo: HpoSpec,
    #[serde(default)]
    pub cv: CvSpec,
    #[serde(default)]
    pub scoring: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_model_store_loc")]
    pub model_store_loc: PathBuf,
    #[serde(default)]
    pub log_metrics: bool,
    #[serde(default)]
    pub train_for_submission: bool,
}

impl Configuration {
    pub fn from_json_str(raw: &str) -> DssResult<Self> {
        serde_json::from_str(raw).map_err(|err| DssError::config("configuration", err.to_string()))
    }

    pub fn from_json_value(value: Value) -> DssResult<Self> {
        serde_json::from_value(value)
            .map_err(|err| DssError::config("configuration", err.to_string()))
    }

    pub fn load(path: &Path) -> DssResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DssError::io(
                format!("failed reading configuration '{}'", path.display()),
                err,
            )
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks every section that does not need data; stage descriptors are
    /// checked by the stage registry.
    pub fn validate(&self, models: &ModelRegistry) -> DssResult<()> {
        self.pretraining.validate()?;
        if self.models.is_empty() {
            return Err(DssError::config("models", "must declare at least one model"));
        }
        for (name, spec) in &self.models {
            models
                .check(spec)
                .map_err(|err| err.with_field_prefix(&format!("models.{name}")))?;
        }
        for (idx, name) in self.ensemble.models().iter().enumerate() {
            if !self.models.contains_key(name) {
                return Err(DssError::config(
                    format!("ensemble.models[{idx}]"),
                    format!("model '{name}' is not declared under models"),
                ));
            }
        }
        if self.cv.apply {
            self.cv.method.validate()?;
        }
        if self.hpo.apply {
            self.hpo.validate()?;
            for (key, value) in self.hpo_probe_values() {
                let field = format!("hpo.space.{key}");
                let Some((model, param)) = split_param_key(&key) else {
                    return Err(DssError::config(field, "expected '<model>.<param>'"));
                };
                let spec = self.models.get(model).ok_or_else(|| {
                    DssError::config(&field, format!("model '{model}' is not declared under models"))
                })?;
                spec.with_override(param, &value)
                    .map_err(|err| err.with_field_prefix(&format!("hpo.space.{model}")))?;
            }
        }
        Ok(())
    }

    /// One representative value per search dimension, used to check that
    /// every dimension names an overridable hyperparameter.
    fn hpo_probe_values(&self) -> Vec<(String, Value)> {
        self.hpo
            .candidates(self.seed)
            .ok()
            .and_then(|candidates| candidates.into_iter().next())
            .map(|candidate| candidate.into_iter().collect())
            .unwrap_or_default()
    }

    /// Copy with `"<model>.<param>"` overrides applied.
    pub fn with_overrides<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> DssResult<Self> {
        let mut config = self.clone();
        for (key, value) in overrides {
            let (model, param) = split_param_key(key).ok_or_else(|| {
                DssError::config(format!("hpo.space.{key}"), "expected '<model>.<param>'")
            })?;
            let spec = config.models.get(model).ok_or_else(|| {
                DssError::config(
                    format!("hpo.space.{key}"),
                    format!("model '{model}' is not declared under models"),
                )
            })?;
            let updated = spec
                .with_override(param, value)
                .map_err(|err| err.with_field_prefix(&format!("models.{model}")))?;
            config.models.insert(model.to_string(), updated);
        }
        Ok(config)
    }

    /// Hash of the canonical document.
    pub fn fingerprint(&self) -> DssResult<Fingerprint> {
        let value = serde_json::to_value(self)
            .map_err(|err| DssError::json("encoding configuration", err))?;
        Ok(Fingerprint::of_json(&value))
    }

    /// Store key of the scaler fitted during pretraining: the inputs that
    /// shape the training windows, without any model spec.
    pub fn scaler_hash(&self) -> DssResult<String> {
        let value = serde_json::to_value((
            "scaler",
            &self.preprocessing,
            &self.feature_engineering,
            &self.pretraining,
            self.seed,
        ))
        .map_err(|err| DssError::json("encoding scaler key", err))?;
        Ok(Fingerprint::of_json(&value).short())
    }

    /// Store key of a trained model: everything that shapes its training data
    /// plus its own spec and the seed.
    pub fn model_hash(&self, model_name: &str) -> DssResult<String> {
        let spec = self.models.get(model_name).ok_or_else(|| {
            DssError::config("models", format!("model '{model_name}' is not declared"))
        })?;
        let value = serde_json::to_value((
            &self.preprocessing,
            &self.feature_engineering,
            &self.pretraining,
            spec,
            self.seed,
        ))
        .map_err(|err| DssError::json("encoding model key", err))?;
        Ok(Fingerprint::of_json(&value).short())
    }
}
