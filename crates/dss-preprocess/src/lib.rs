// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Preprocessing stages: label generation from event annotations, window
//! layout and filtering, plus window materialization, downsampling and
//! feature scaling used by pretraining.

pub mod downsample;
pub mod event_labels;
pub mod remove_unlabeled;
pub mod scaler;
pub mod segmentation;
pub mod similarity;
pub mod split_windows;
pub mod state_labels;
mod stats;

pub use downsample::{DownsampleMethod, DownsampleSpec, materialize_windows};
pub use event_labels::AddEventLabels;
pub use remove_unlabeled::RemoveUnlabeled;
pub use scaler::{FittedScaler, ScalerKind, ScalerSpec};
pub use segmentation::AddSegmentationLabels;
pub use similarity::{STEPS_PER_DAY, SimilarityNan};
pub use split_windows::SplitWindows;
pub use state_labels::{AddStateLabels, PairingPolicy};
