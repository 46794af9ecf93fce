// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::baseline::{MEAN_BASELINE_MODEL, MeanBaseline};
use crate::linear::{LINEAR_MODEL, LinearModel};
use crate::model::{Model, ModelArtifact};
use crate::spec::ModelSpec;
use dss_core::{DssError, DssResult};
use std::collections::BTreeMap;

pub type BuildFn = fn(&ModelSpec) -> DssResult<Box<dyn Model>>;
pub type RestoreFn = fn(&ModelArtifact) -> DssResult<Box<dyn Model>>;

#[derive(Clone, Copy)]
struct ModelFactory {
    build: BuildFn,
    restore: RestoreFn,
}

/// Explicit `type -> factory` map, built once and passed to drivers.
#[derive(Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<&'static str, ModelFactory>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `linear` and `mean-baseline` models.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            LINEAR_MODEL,
            |spec| Ok(Box::new(LinearModel::new(spec)?)),
            |artifact| Ok(Box::new(LinearModel::from_artifact(artifact)?)),
        );
        registry.register(
            MEAN_BASELINE_MODEL,
            |spec| Ok(Box::new(MeanBaseline::new(spec)?)),
            |artifact| Ok(Box::new(MeanBaseline::from_artifact(artifact)?)),
        );
        registry
    }

    pub fn register(&mut self, model_type: &'static str, build: BuildFn, restore: RestoreFn) {
        self.factories
            .insert(model_type, ModelFactory { build, restore });
    }

    pub fn contains(&self, model_type: &str) -> bool {
        self.factories.contains_key(model_type)
    }

    pub fn model_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    fn factory(&self, model_type: &str) -> DssResult<ModelFactory> {
        self.factories
            .get(model_type)
            .copied()
            .ok_or_else(|| DssError::unknown_kind("model", model_type, &self.model_types()))
    }

    /// Checks a spec without building the model.
    pub fn check(&self, spec: &ModelSpec) -> DssResult<()> {
        self.factory(&spec.model_type)?;
        spec.validate()
    }

    pub fn build(&self, spec: &ModelSpec) -> DssResult<Box<dyn Model>> {
        (self.factory(&spec.model_type)?.build)(spec)
    }

    pub fn restore(&self, artifact: &ModelArtifact) -> DssResult<Box<dyn Model>> {
        (self.factory(&artifact.model_type)?.restore)(artifact)
    }
}
