// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! End-to-end driver: the configuration document, the stage registry that
//! turns descriptors into stages, the cached executor, and the training,
//! cross-validation and hyperparameter-search flows built on top of them.

pub mod cache;
pub mod config;
pub mod executor;
pub mod pipeline;
pub mod pretrain;
pub mod registry;
pub mod training;

pub use cache::{ArtifactCache, CachedStage};
pub use config::{Configuration, PretrainingSpec, StageDescriptor};
pub use executor::{
    PipelineExecutor, PipelineRun, SeriesFailurePolicy, SkippedSeries, StageReport,
    input_fingerprint,
};
pub use pipeline::{ModelReport, Pipeline, RunReport, SUBMISSION_PREFIX};
pub use pretrain::{PretrainedData, prepare_windows, pretrain, pretrain_with_scaler};
pub use registry::{
    FeatureBuilder, FeatureStage, PipelineStage, PreprocessingBuilder, PreprocessingStage,
    StageRegistry, check_order,
};
pub use training::{
    EVENT_PEAK_DISTANCE, SCALER_ARTIFACT, ScoreReport, TrainedModel, load_models, load_scaler,
    predict_ensemble, save_models, save_scaler, score_split, score_stream, train_models,
};
