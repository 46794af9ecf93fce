// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Model training for the sleep-state window pipeline.
//!
//! Concrete network architectures live outside this crate; models plug in
//! through [`Model`] and an explicit [`ModelRegistry`]. The built-in
//! `linear` and `mean-baseline` models keep the whole chain runnable.

pub mod baseline;
pub mod linear;
pub mod model;
pub mod registry;
pub mod spec;
pub mod store;
pub mod trainer;

pub use baseline::{MEAN_BASELINE_MODEL, MeanBaseline};
pub use linear::{LINEAR_MODEL, LinearModel, LinearWeights};
pub use model::{Model, ModelArtifact, TrainSummary};
pub use registry::{BuildFn, ModelRegistry, RestoreFn};
pub use spec::{LossKind, LrSchedule, ModelSpec, OptimizerKind, ScheduleKind};
pub use store::{MODEL_ENVELOPE_SCHEMA_VERSION, ModelEnvelope, ModelStore};
pub use trainer::{EpochLearner, EpochTrainer};
