// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::events::{EventRecord, EventTable};
use crate::table::{Series, SeriesTable};
use crate::{DssError, DssResult};
use serde::de::DeserializeOwned;

/// A pure per-series table transform configured from a stage descriptor.
///
/// Implementations hold only their parameters. `transform_series` must not
/// touch global state so that runs replay byte-identically.
pub trait TableStage: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Canonical parameters; part of the cache fingerprint.
    fn params(&self) -> serde_json::Value;

    /// Transforms one series. `Ok(None)` drops the series from the table.
    fn transform_series(&self, series: Series, events: &[EventRecord])
    -> DssResult<Option<Series>>;

    /// Applies the stage to every series in parallel, aborting on the first failure.
    fn transform(&self, table: SeriesTable, events: &EventTable) -> DssResult<SeriesTable> {
        table
            .try_map_series(|series| {
                let id = series.id().to_string();
                self.transform_series(series, events.for_series(&id))
            })
            .map_err(|(series_id, err)| DssError::data(format!("series '{series_id}': {err}")))
    }
}

/// Deserializes stage parameters, mapping serde errors onto a config error.
///
/// A missing or `null` parameter object is treated as `{}`.
pub fn parse_params<T: DeserializeOwned>(kind: &str, params: &serde_json::Value) -> DssResult<T> {
    let value = if params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value)
        .map_err(|err| DssError::config("", format!("invalid parameters for '{kind}': {err}")))
}
