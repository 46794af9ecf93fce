// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventRecord, Series, StateLabel, TableStage, WindowLayout};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Drops rows, windows or whole series that carry no usable state label.
///
/// Unlabeled rows are always dropped; `remove_nan` also drops ignore rows.
/// After `split_windows` only window starts are filtered, rows are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveUnlabeled {
    /// With windows: drop a window if any row is unlabeled, not only when all are.
    #[serde(default)]
    pub remove_partially_unlabeled_windows: bool,
    #[serde(default)]
    pub remove_nan: bool,
    /// Drop every series that contains an unlabeled row. Ignores windows.
    #[serde(default)]
    pub remove_entire_series: bool,
}

impl RemoveUnlabeled {
    fn is_removed(&self, label: StateLabel) -> bool {
        match label {
            StateLabel::Unlabeled => true,
            StateLabel::Ignore => self.remove_nan,
            StateLabel::Asleep | StateLabel::Awake => false,
        }
    }

    fn keep_window(&self, labels: &[StateLabel]) -> bool {
        let mut drop_any = labels.iter().any(|&l| l == StateLabel::Unlabeled);
        let mut drop_all = labels.iter().all(|&l| l == StateLabel::Unlabeled);
        if self.remove_nan {
            drop_any |= labels.iter().any(|&l| l == StateLabel::Ignore);
            drop_all |= labels.iter().all(|&l| l == StateLabel::Ignore);
        }
        if self.remove_partially_unlabeled_windows {
            !drop_any
        } else {
            !drop_all
        }
    }
}

impl TableStage for RemoveUnlabeled {
    fn kind(&self) -> &'static str {
        "remove_unlabeled"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "remove_partially_unlabeled_windows": self.remove_partially_unlabeled_windows,
            "remove_nan": self.remove_nan,
            "remove_entire_series": self.remove_entire_series,
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let state = series
            .state()
            .ok_or_else(|| {
                DssError::data(format!(
                    "series '{}' has no state labels; run add_state_labels first",
                    series.id()
                ))
            })?
            .to_vec();

        if self.remove_entire_series {
            if state.iter().any(|&l| self.is_removed(l)) {
                debug!(series_id = series.id(), "dropping series with unlabeled rows");
                return Ok(None);
            }
            return Ok(Some(series));
        }

        if let Some(layout) = series.windows() {
            let starts: Vec<usize> = layout
                .starts
                .iter()
                .copied()
                .filter(|&start| self.keep_window(&state[start..start + layout.size]))
                .collect();
            let removed = layout.len() - starts.len();
            let size = layout.size;
            if starts.is_empty() {
                debug!(series_id = series.id(), "every window unlabeled; dropping series");
                return Ok(None);
            }
            if removed > 0 {
                debug!(series_id = series.id(), removed, "removed unlabeled windows");
            }
            series.set_windows(WindowLayout { size, starts })?;
            return Ok(Some(series));
        }

        let keep: Vec<bool> = state.iter().map(|&l| !self.is_removed(l)).collect();
        if !keep.iter().any(|&k| k) {
            debug!(series_id = series.id(), "every row unlabeled; dropping series");
            return Ok(None);
        }
        series.retain_rows(&keep)?;
        Ok(Some(series))
    }
}
