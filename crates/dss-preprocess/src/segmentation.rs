// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{
    DssError, DssResult, EventRecord, ONE_HOT_TARGETS, Series, TableStage, one_hot_target_name,
};
use serde::{Deserialize, Serialize};

/// One-hot segmentation targets (`hot_asleep`, `hot_awake`, `hot_ignore`) from
/// the state labels. Unlabeled rows are zero in all three.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddSegmentationLabels {}

impl TableStage for AddSegmentationLabels {
    fn kind(&self) -> &'static str {
        "add_segmentation_labels"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let state = series.state().ok_or_else(|| {
            DssError::data(format!(
                "series '{}' has no state labels; run add_state_labels first",
                series.id()
            ))
        })?;

        let mut columns: Vec<Vec<f64>> = vec![vec![0.0; state.len()]; ONE_HOT_TARGETS.len()];
        for (row, &label) in state.iter().enumerate() {
            if let Some(name) = one_hot_target_name(label)
                && let Some(col) = ONE_HOT_TARGETS.iter().position(|t| *t == name)
            {
                columns[col][row] = 1.0;
            }
        }
        for (name, values) in ONE_HOT_TARGETS.iter().zip(columns) {
            series.set_target(*name, values)?;
        }
        Ok(Some(series))
    }
}
