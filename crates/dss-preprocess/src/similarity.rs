// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventRecord, Series, TableStage};
use serde::{Deserialize, Serialize};

/// Rows per day at the 5 second sampling interval.
pub const STEPS_PER_DAY: usize = 24 * 60 * 60 / 5;

pub const SIMILARITY_COLUMN: &str = "similarity_nan";
pub const SIMILARITY_FEATURE: &str = "f_similarity_nan";

fn default_column() -> String {
    "anglez".to_string()
}

fn default_steps_per_day() -> usize {
    STEPS_PER_DAY
}

/// Flags rows whose signal repeats the same time of day on another day.
///
/// Devices that were taken off often replay a constant or duplicated
/// pattern, so a zero minimum difference marks suspected missing signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimilarityNan {
    #[serde(default = "default_column")]
    pub column: String,
    #[serde(default = "default_steps_per_day")]
    pub steps_per_day: usize,
    #[serde(default)]
    pub as_feature: bool,
}

impl Default for SimilarityNan {
    fn default() -> Self {
        Self {
            column: default_column(),
            steps_per_day: STEPS_PER_DAY,
            as_feature: false,
        }
    }
}

impl SimilarityNan {
    pub fn validate(&self) -> DssResult<()> {
        if self.column.trim().is_empty() {
            return Err(DssError::config("column", "must be non-empty"));
        }
        if self.steps_per_day < 2 {
            return Err(DssError::config(
                "steps_per_day",
                format!("must be >= 2, got {}", self.steps_per_day),
            ));
        }
        Ok(())
    }

    pub fn output_name(&self) -> &'static str {
        if self.as_feature {
            SIMILARITY_FEATURE
        } else {
            SIMILARITY_COLUMN
        }
    }
}

impl TableStage for SimilarityNan {
    fn kind(&self) -> &'static str {
        "similarity_nan"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "column": self.column,
            "steps_per_day": self.steps_per_day,
            "as_feature": self.as_feature,
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let values = series.require_column(&self.column)?;
        let diff = similarity_nan(values, self.steps_per_day);
        series.set_column(self.output_name(), diff)?;
        Ok(Some(series))
    }
}

/// Minimum absolute difference of every row to the same offset on the other days.
///
/// Series shorter than one day are all zeros. The last partial day is
/// compared against a zero-padded tail.
pub fn similarity_nan(values: &[f64], steps_per_day: usize) -> Vec<f64> {
    let n = values.len();
    if n < steps_per_day || steps_per_day == 0 {
        return vec![0.0; n];
    }

    let days = n.div_ceil(steps_per_day);
    let at = |idx: usize| if idx < n { values[idx] } else { 0.0 };

    (0..n)
        .map(|i| {
            let day = i / steps_per_day;
            let offset = i % steps_per_day;
            let value = values[i];
            if value.is_nan() {
                return f64::NAN;
            }
            let min = (0..days)
                .filter(|&other| other != day)
                .map(|other| (value - at(other * steps_per_day + offset)).abs())
                .fold(f64::INFINITY, f64::min);
            if min.is_finite() { min } else { f64::NAN }
        })
        .collect()
}
