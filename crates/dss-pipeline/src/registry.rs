// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::StageDescriptor;
use dss_core::{DssError, DssResult, EventRecord, Series, TableStage, parse_params};
use dss_features::{FeatureParser, ParserParams, SunStage, TimeStage};
use dss_preprocess::{
    AddEventLabels, AddSegmentationLabels, AddStateLabels, RemoveUnlabeled, SimilarityNan,
    SplitWindows,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Row-shaping and labeling stages.
#[derive(Clone, Debug, PartialEq)]
pub enum PreprocessingStage {
    SimilarityNan(SimilarityNan),
    AddStateLabels(AddStateLabels),
    AddEventLabels(AddEventLabels),
    AddSegmentationLabels(AddSegmentationLabels),
    RemoveUnlabeled(RemoveUnlabeled),
    SplitWindows(SplitWindows),
}

impl PreprocessingStage {
    fn inner(&self) -> &dyn TableStage {
        match self {
            Self::SimilarityNan(stage) => stage,
            Self::AddStateLabels(stage) => stage,
            Self::AddEventLabels(stage) => stage,
            Self::AddSegmentationLabels(stage) => stage,
            Self::RemoveUnlabeled(stage) => stage,
            Self::SplitWindows(stage) => stage,
        }
    }
}

/// Column-appending feature stages.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureStage {
    Parser(FeatureParser),
    Sun(SunStage),
    Time(TimeStage),
}

impl FeatureStage {
    fn inner(&self) -> &dyn TableStage {
        match self {
            Self::Parser(stage) => stage,
            Self::Sun(stage) => stage,
            Self::Time(stage) => stage,
        }
    }
}

/// A resolved stage of either category, in pipeline order.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineStage {
    Preprocessing(PreprocessingStage),
    Feature(FeatureStage),
}

impl PipelineStage {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Preprocessing(_) => "preprocessing",
            Self::Feature(_) => "feature_engineering",
        }
    }

    fn inner(&self) -> &dyn TableStage {
        match self {
            Self::Preprocessing(stage) => stage.inner(),
            Self::Feature(stage) => stage.inner(),
        }
    }
}

impl TableStage for PipelineStage {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn params(&self) -> Value {
        self.inner().params()
    }

    fn transform_series(
        &self,
        series: Series,
        events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        self.inner().transform_series(series, events)
    }
}

pub type PreprocessingBuilder = fn(&Value) -> DssResult<PreprocessingStage>;
pub type FeatureBuilder = fn(&Value) -> DssResult<FeatureStage>;

fn similarity_nan(params: &Value) -> DssResult<PreprocessingStage> {
    let stage: SimilarityNan = parse_params("similarity_nan", params)?;
    stage.validate()?;
    Ok(PreprocessingStage::SimilarityNan(stage))
}

fn add_state_labels(params: &Value) -> DssResult<PreprocessingStage> {
    let stage: AddStateLabels = parse_params("add_state_labels", params)?;
    stage.validate()?;
    Ok(PreprocessingStage::AddStateLabels(stage))
}

fn add_event_labels(params: &Value) -> DssResult<PreprocessingStage> {
    let stage: AddEventLabels = parse_params("add_event_labels", params)?;
    stage.validate()?;
    Ok(PreprocessingStage::AddEventLabels(stage))
}

fn add_segmentation_labels(params: &Value) -> DssResult<PreprocessingStage> {
    parse_params("add_segmentation_labels", params).map(PreprocessingStage::AddSegmentationLabels)
}

fn remove_unlabeled(params: &Value) -> DssResult<PreprocessingStage> {
    parse_params("remove_unlabeled", params).map(PreprocessingStage::RemoveUnlabeled)
}

fn split_windows(params: &Value) -> DssResult<PreprocessingStage> {
    let stage: SplitWindows = parse_params("split_windows", params)?;
    stage.validate()?;
    Ok(PreprocessingStage::SplitWindows(stage))
}

fn parser(params: &Value) -> DssResult<FeatureStage> {
    let params: ParserParams = parse_params("parser", params)?;
    FeatureParser::new(params).map(FeatureStage::Parser)
}

fn sun(params: &Value) -> DssResult<FeatureStage> {
    let stage: SunStage = parse_params("sun", params)?;
    stage.validate()?;
    Ok(FeatureStage::Sun(stage))
}

fn time(params: &Value) -> DssResult<FeatureStage> {
    let stage: TimeStage = parse_params("time", params)?;
    stage.validate()?;
    Ok(FeatureStage::Time(stage))
}

/// Explicit `kind -> builder` tables for both stage categories.
///
/// Constructed once and passed to the pipeline; there is no global registry.
#[derive(Clone)]
pub struct StageRegistry {
    preprocessing: BTreeMap<&'static str, PreprocessingBuilder>,
    features: BTreeMap<&'static str, FeatureBuilder>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self {
            preprocessing: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_preprocessing("similarity_nan", similarity_nan);
        registry.register_preprocessing("add_state_labels", add_state_labels);
        registry.register_preprocessing("add_event_labels", add_event_labels);
        registry.register_preprocessing("add_segmentation_labels", add_segmentation_labels);
        registry.register_preprocessing("remove_unlabeled", remove_unlabeled);
        registry.register_preprocessing("split_windows", split_windows);
        registry.register_feature("parser", parser);
        registry.register_feature("sun", sun);
        registry.register_feature("time", time);
        registry
    }

    pub fn register_preprocessing(&mut self, kind: &'static str, build: PreprocessingBuilder) {
        self.preprocessing.insert(kind, build);
    }

    pub fn register_feature(&mut self, kind: &'static str, build: FeatureBuilder) {
        self.features.insert(kind, build);
    }

    pub fn preprocessing_kinds(&self) -> Vec<&'static str> {
        self.preprocessing.keys().copied().collect()
    }

    pub fn feature_kinds(&self) -> Vec<&'static str> {
        self.features.keys().copied().collect()
    }

    /// Resolves `preprocessing[index]`; config errors carry that prefix.
    pub fn resolve_preprocessing(
        &self,
        index: usize,
        descriptor: &StageDescriptor,
    ) -> DssResult<PreprocessingStage> {
        let build = self
            .preprocessing
            .get(descriptor.kind.as_str())
            .ok_or_else(|| {
                DssError::unknown_kind("preprocessing", &descriptor.kind, &self.preprocessing_kinds())
            })?;
        build(&descriptor.params_value())
            .map_err(|err| err.with_field_prefix(&format!("preprocessing[{index}]")))
    }

    /// Resolves `feature_engineering[index]`.
    pub fn resolve_feature(
        &self,
        index: usize,
        descriptor: &StageDescriptor,
    ) -> DssResult<FeatureStage> {
        let build = self.features.get(descriptor.kind.as_str()).ok_or_else(|| {
            DssError::unknown_kind("feature_engineering", &descriptor.kind, &self.feature_kinds())
        })?;
        build(&descriptor.params_value())
            .map_err(|err| err.with_field_prefix(&format!("feature_engineering[{index}]")))
    }

    /// Resolves both lists in declared order and checks their ordering.
    pub fn resolve_all(
        &self,
        preprocessing: &[StageDescriptor],
        features: &[StageDescriptor],
    ) -> DssResult<Vec<PipelineStage>> {
        let mut stages = Vec::with_capacity(preprocessing.len() + features.len());
        for (index, descriptor) in preprocessing.iter().enumerate() {
            stages.push(PipelineStage::Preprocessing(
                self.resolve_preprocessing(index, descriptor)?,
            ));
        }
        for (index, descriptor) in features.iter().enumerate() {
            stages.push(PipelineStage::Feature(self.resolve_feature(index, descriptor)?));
        }
        check_order(&stages)?;
        Ok(stages)
    }
}

/// Ordering rules between preprocessing stages.
///
/// Segmentation labels and unlabeled-row removal need state labels from an
/// earlier stage, and after `split_windows` only `remove_unlabeled` may
/// reshape rows.
pub fn check_order(stages: &[PipelineStage]) -> DssResult<()> {
    let mut has_state = false;
    let mut windowed = false;
    let mut index = 0;
    for stage in stages {
        let PipelineStage::Preprocessing(stage) = stage else {
            continue;
        };
        let field = format!("preprocessing[{index}]");
        index += 1;
        match stage {
            PreprocessingStage::AddStateLabels(_) => has_state = true,
            PreprocessingStage::AddSegmentationLabels(_) | PreprocessingStage::RemoveUnlabeled(_)
                if !has_state =>
            {
                return Err(DssError::config(
                    field,
                    format!(
                        "{} needs an earlier add_state_labels stage",
                        stage.inner().kind()
                    ),
                ));
            }
            _ => {}
        }
        if windowed && !matches!(stage, PreprocessingStage::RemoveUnlabeled(_)) {
            return Err(DssError::config(
                field,
                format!(
                    "{} cannot follow split_windows; only remove_unlabeled may",
                    stage.inner().kind()
                ),
            ));
        }
        if matches!(stage, PreprocessingStage::SplitWindows(_)) {
            windowed = true;
        }
    }
    Ok(())
}
