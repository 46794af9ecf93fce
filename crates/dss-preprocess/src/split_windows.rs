// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventRecord, Series, TableStage, WindowLayout};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Records fixed-size window starts on each series.
///
/// Windows start at `0, stride, 2*stride, ..` and only full windows are kept;
/// a trailing partial window is dropped, never padded. A series shorter than
/// one window is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitWindows {
    pub window_size: usize,
    #[serde(default)]
    pub stride: Option<usize>,
}

impl SplitWindows {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            stride: None,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride.unwrap_or(self.window_size)
    }

    pub fn validate(&self) -> DssResult<()> {
        if self.window_size == 0 {
            return Err(DssError::config("window_size", "must be >= 1"));
        }
        if self.stride == Some(0) {
            return Err(DssError::config("stride", "must be >= 1"));
        }
        Ok(())
    }
}

impl TableStage for SplitWindows {
    fn kind(&self) -> &'static str {
        "split_windows"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "window_size": self.window_size,
            "stride": self.stride(),
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let layout = WindowLayout::strided(series.len(), self.window_size, self.stride())?;
        if layout.is_empty() {
            debug!(
                series_id = series.id(),
                rows = series.len(),
                window_size = self.window_size,
                "series shorter than one window; dropping"
            );
            return Ok(None);
        }
        series.set_windows(layout)?;
        Ok(Some(series))
    }
}
