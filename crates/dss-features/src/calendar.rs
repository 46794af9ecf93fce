// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::{DateTime, Datelike, Timelike, Utc};
use dss_core::{DssError, DssResult, EventRecord, Series, TableStage};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFeature {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// Monday = 0.
    Weekday,
    SinHour,
    CosHour,
}

impl TimeFeature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Weekday => "weekday",
            Self::SinHour => "sin_hour",
            Self::CosHour => "cos_hour",
        }
    }

    pub fn column_name(self) -> String {
        format!("f_{}", self.as_str())
    }

    fn value(self, local: &DateTime<Utc>) -> f64 {
        let hour_angle = f64::from(local.hour()) / 24.0 * TAU;
        match self {
            Self::Year => f64::from(local.year()),
            Self::Month => f64::from(local.month()),
            Self::Day => f64::from(local.day()),
            Self::Hour => f64::from(local.hour()),
            Self::Minute => f64::from(local.minute()),
            Self::Second => f64::from(local.second()),
            Self::Weekday => f64::from(local.weekday().num_days_from_monday()),
            Self::SinHour => hour_angle.sin(),
            Self::CosHour => hour_angle.cos(),
        }
    }
}

/// Local calendar features derived from each row's timestamp plus the
/// series UTC offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeStage {
    pub time_features: Vec<TimeFeature>,
}

impl TimeStage {
    pub fn validate(&self) -> DssResult<()> {
        if self.time_features.is_empty() {
            return Err(DssError::config("time_features", "must be non-empty"));
        }
        Ok(())
    }
}

impl TableStage for TimeStage {
    fn kind(&self) -> &'static str {
        "time"
    }

    fn params(&self) -> serde_json::Value {
        let mut features = self.time_features.clone();
        features.sort();
        features.dedup();
        serde_json::json!({ "time_features": features })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let offset = i64::from(series.utc_offset_seconds());
        let local = series
            .timestamps()
            .iter()
            .map(|&ts| {
                DateTime::<Utc>::from_timestamp(ts + offset, 0).ok_or_else(|| {
                    DssError::data(format!(
                        "series '{}' timestamp {ts} is out of the supported range",
                        series.id()
                    ))
                })
            })
            .collect::<DssResult<Vec<_>>>()?;
        for feature in &self.time_features {
            let values = local.iter().map(|dt| feature.value(dt)).collect();
            series.set_column(feature.column_name(), values)?;
        }
        Ok(Some(series))
    }
}
