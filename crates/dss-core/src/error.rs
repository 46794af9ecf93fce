// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Error taxonomy shared by every pipeline crate.
///
/// Configuration problems (including unknown stage, model or combination
/// kinds) are raised while a pipeline is constructed, before any data is
/// touched. Data problems affecting a single series are normally handled by a
/// documented fallback inside the stage; only shape-level problems surface as
/// errors.
#[derive(Debug, Error)]
pub enum DssError {
    #[error("config error at {field}: {message}")]
    Config { field: String, message: String },

    #[error("unknown {category} kind '{kind}'; expected one of: {expected}")]
    UnknownStageKind {
        category: &'static str,
        kind: String,
        expected: String,
    },

    #[error("data error: {0}")]
    Data(String),

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("stage {index} ({kind}){} failed: {source}", series_suffix(.series_id))]
    StageExecution {
        index: usize,
        kind: String,
        series_id: Option<String>,
        #[source]
        source: Box<DssError>,
    },

    #[error("training error: {0}")]
    Training(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

fn series_suffix(series_id: &Option<String>) -> String {
    match series_id {
        Some(id) => format!(" on series '{id}'"),
        None => String::new(),
    }
}

/// Coarse category used by drivers to report failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Data,
    StageExecution,
    Training,
    Cancelled,
    Io,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::StageExecution => "stage_execution",
            Self::Training => "training",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl DssError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unknown_kind(category: &'static str, kind: impl Into<String>, expected: &[&str]) -> Self {
        Self::UnknownStageKind {
            category,
            kind: kind.into(),
            expected: expected.join(", "),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn shape_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn training(message: impl Into<String>) -> Self {
        Self::Training(message.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Wraps an error raised inside a stage with the stage position and kind.
    pub fn in_stage(self, index: usize, kind: impl Into<String>, series_id: Option<&str>) -> Self {
        Self::StageExecution {
            index,
            kind: kind.into(),
            series_id: series_id.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// Prefixes the field path of a config error, e.g. `lr` -> `models.gru.lr`.
    pub fn with_field_prefix(self, prefix: &str) -> Self {
        match self {
            Self::Config { field, message } => Self::Config {
                field: if field.is_empty() {
                    prefix.to_string()
                } else {
                    format!("{prefix}.{field}")
                },
                message,
            },
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::UnknownStageKind { .. } => ErrorCategory::Config,
            Self::Data(_) | Self::ShapeMismatch { .. } => ErrorCategory::Data,
            Self::StageExecution { .. } => ErrorCategory::StageExecution,
            Self::Training(_) => ErrorCategory::Training,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Io { .. } | Self::Json { .. } => ErrorCategory::Io,
        }
    }

    /// The configuration field or stage kind this error originates from, if known.
    pub fn origin(&self) -> Option<String> {
        match self {
            Self::Config { field, .. } => Some(field.clone()),
            Self::UnknownStageKind { category, kind, .. } => Some(format!("{category}:{kind}")),
            Self::StageExecution { index, kind, .. } => Some(format!("stage[{index}]:{kind}")),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StageExecution { .. } | Self::Training(_))
    }
}

pub type DssResult<T> = Result<T, DssError>;

#[cfg(test)]
mod tests {
    use super::{DssError, ErrorCategory};

    #[test]
    fn config_error_display_names_field() {
        let err = DssError::config("ensemble.weights", "length 1 does not match 2 models");
        assert_eq!(
            err.to_string(),
            "config error at ensemble.weights: length 1 does not match 2 models"
        );
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.origin().as_deref(), Some("ensemble.weights"));
    }

    #[test]
    fn unknown_kind_lists_expected_kinds() {
        let err = DssError::unknown_kind("preprocessing", "pca", &["split_windows", "remove_unlabeled"]);
        assert_eq!(
            err.to_string(),
            "unknown preprocessing kind 'pca'; expected one of: split_windows, remove_unlabeled"
        );
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn stage_wrapper_keeps_index_kind_and_series() {
        let err = DssError::data("missing column 'anglez'").in_stage(3, "parser", Some("038441c925bb"));
        assert_eq!(
            err.to_string(),
            "stage 3 (parser) on series '038441c925bb' failed: data error: missing column 'anglez'"
        );
        assert_eq!(err.category(), ErrorCategory::StageExecution);
        assert_eq!(err.origin().as_deref(), Some("stage[3]:parser"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn field_prefix_only_applies_to_config_errors() {
        let err = DssError::config("lr", "must be > 0").with_field_prefix("models.gru");
        assert_eq!(err.origin().as_deref(), Some("models.gru.lr"));

        let data = DssError::data("x").with_field_prefix("models.gru");
        assert!(data.origin().is_none());
    }

    #[test]
    fn category_strings_are_stable() {
        assert_eq!(ErrorCategory::StageExecution.as_str(), "stage_execution");
        assert_eq!(ErrorCategory::Cancelled.as_str(), "cancelled");
    }
}
