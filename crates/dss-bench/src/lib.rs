// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Synthetic inputs shared by the benchmarks.

use dss_core::{DssResult, EventKind, EventRecord, EventTable, Series, SeriesTable};
use std::collections::BTreeMap;

/// Five-second epochs starting 2018-08-14T22:30:05Z.
const START: i64 = 1_534_285_805;

/// Recording with one sleep period in the middle third.
pub fn night(id: &str, rows: usize) -> DssResult<Series> {
    let (onset, wakeup) = (rows / 3, 2 * rows / 3);
    let mut anglez = Vec::with_capacity(rows);
    let mut enmo = Vec::with_capacity(rows);
    for i in 0..rows {
        let asleep = (onset..wakeup).contains(&i);
        let wobble = (i as f64 * 0.013).sin();
        anglez.push(if asleep { -55.0 + wobble } else { 35.0 * wobble });
        enmo.push(if asleep { 0.002 } else { 0.03 + 0.02 * wobble.abs() });
    }
    let columns = BTreeMap::from([("anglez".to_string(), anglez), ("enmo".to_string(), enmo)]);
    Series::new(
        id,
        (0..rows as u64).collect(),
        (0..rows as i64).map(|i| START + 5 * i).collect(),
        -14_400,
        columns,
    )
}

/// `n` nights plus their onset/wakeup events.
pub fn nights(n: usize, rows: usize) -> DssResult<(SeriesTable, EventTable)> {
    let series = (0..n)
        .map(|i| night(&format!("night{i:03}"), rows))
        .collect::<DssResult<Vec<Series>>>()?;
    let events = EventTable::new(series.iter().flat_map(|s| {
        [
            EventRecord::new(s.id(), EventKind::Onset, Some((rows / 3) as u64)),
            EventRecord::new(s.id(), EventKind::Wakeup, Some((2 * rows / 3) as u64)),
        ]
    }));
    Ok((SeriesTable::new(series)?, events))
}
