// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Core shared types for the sleep-state window pipeline: series tables,
//! event annotations, windows, prediction streams, errors, fingerprints and
//! the execution context threaded through every driver.

pub mod control;
pub mod error;
pub mod events;
pub mod execution_context;
pub mod fingerprint;
pub mod observability;
pub mod prediction;
pub mod repro;
pub mod stage;
pub mod table;
pub mod window;

pub use control::{Budget, BudgetMode, BudgetStatus, CancelToken};
pub use error::{DssError, DssResult, ErrorCategory};
pub use events::{EventKind, EventRecord, EventTable, parse_event_kind};
pub use execution_context::ExecutionContext;
pub use fingerprint::{Fingerprint, FingerprintBuilder, canonical_json};
pub use observability::{MemoryMetricsSink, MetricsSink, ProgressSink};
pub use prediction::{PredictionStream, RowKey};
pub use repro::{DEFAULT_SEED, derive_seed};
pub use stage::{TableStage, parse_params};
pub use table::{Series, SeriesTable, StateLabel};
pub use window::{Window, WindowDataset, WindowLayout};

/// One-hot segmentation target names, in state-code order.
pub const ONE_HOT_TARGETS: [&str; 3] = ["hot_asleep", "hot_awake", "hot_ignore"];

/// Target column holding the one-hot encoding of a state label.
///
/// `Unlabeled` rows have no hot column; all three targets are zero there.
pub fn one_hot_target_name(label: StateLabel) -> Option<&'static str> {
    match label {
        StateLabel::Asleep => Some(ONE_HOT_TARGETS[0]),
        StateLabel::Awake => Some(ONE_HOT_TARGETS[1]),
        StateLabel::Ignore => Some(ONE_HOT_TARGETS[2]),
        StateLabel::Unlabeled => None,
    }
}
