// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Scoring and search control loops: event-detection metrics, series-grouped
//! cross-validation splits, and the CV / HPO harness that repeatedly runs a
//! caller-supplied scoring closure.

pub mod cv;
pub mod hpo;
pub mod metrics;

pub use cv::{
    CvMethod, CvReport, CvSpec, Fold, FoldOutcome, FoldReport, run_cv, split_groups,
    train_test_split,
};
pub use hpo::{
    Candidate, HpoMethod, HpoReport, HpoSpec, ParamDistribution, StopReason, TrialOutcome,
    TrialRecord, run_hpo, split_param_key,
};
pub use metrics::{
    DEFAULT_TOLERANCES, EventApReport, PredictedEvent, event_detection_ap, extract_events, mse,
};
