// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! CSV readers for accelerometer recordings and event annotations.
//!
//! Series files carry `series_id`, `step`, `timestamp` and any number of
//! numeric signal columns. Event files carry `series_id`, `event`, `step`
//! and optionally `timestamp`; an empty `step` marks a missing event.
//! Timestamps are unix seconds or ISO-8601 with a numeric UTC offset.

use chrono::DateTime;
use dss_core::{
    DssError, DssResult, EventRecord, EventTable, Series, SeriesTable, parse_event_kind,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const SERIES_ID: &str = "series_id";
const STEP: &str = "step";
const TIMESTAMP: &str = "timestamp";
const EVENT: &str = "event";

/// Parses a timestamp into UTC unix seconds plus the local UTC offset.
pub fn parse_timestamp(raw: &str) -> DssResult<(i64, i32)> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<i64>() {
        return Ok((seconds, 0));
    }
    let parsed = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|err| DssError::data(format!("invalid timestamp '{raw}': {err}")))?;
    Ok((parsed.timestamp(), parsed.offset().local_minus_utc()))
}

fn column_index(headers: &csv::StringRecord, name: &str, source: &str) -> DssResult<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| DssError::data(format!("{source}: missing required column '{name}'")))
}

fn csv_error(source: &str, err: csv::Error) -> DssError {
    DssError::data(format!("{source}: {err}"))
}

fn parse_field<T: std::str::FromStr>(raw: &str, column: &str, line: u64) -> DssResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|err| {
        DssError::data(format!("line {line}: invalid {column} '{raw}': {err}"))
    })
}

#[derive(Default)]
struct SeriesRows {
    rows: Vec<(u64, i64, Vec<f64>)>,
    utc_offset: i32,
}

/// Reads one recording table from any CSV source.
pub fn read_series<R: Read>(reader: R, source: &str) -> DssResult<SeriesTable> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv.headers().map_err(|err| csv_error(source, err))?.clone();
    let id_idx = column_index(&headers, SERIES_ID, source)?;
    let step_idx = column_index(&headers, STEP, source)?;
    let ts_idx = column_index(&headers, TIMESTAMP, source)?;
    let signals: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| ![id_idx, step_idx, ts_idx].contains(idx))
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, SeriesRows> = BTreeMap::new();
    for record in csv.records() {
        let record = record.map_err(|err| csv_error(source, err))?;
        let line = record.position().map_or(0, |p| p.line());
        let id = record.get(id_idx).unwrap_or_default().to_string();
        let step: u64 = parse_field(record.get(step_idx).unwrap_or_default(), STEP, line)?;
        let (timestamp, offset) = parse_timestamp(record.get(ts_idx).unwrap_or_default())?;
        let values = signals
            .iter()
            .map(|(idx, name)| match record.get(*idx).unwrap_or_default() {
                "" => Ok(f64::NAN),
                raw => parse_field::<f64>(raw, name, line),
            })
            .collect::<DssResult<Vec<f64>>>()?;

        let entry = grouped.entry(id.clone()).or_insert_with(|| {
            order.push(id);
            SeriesRows {
                utc_offset: offset,
                ..SeriesRows::default()
            }
        });
        entry.rows.push((step, timestamp, values));
    }

    let series = order
        .into_iter()
        .filter_map(|id| grouped.remove(&id).map(|rows| (id, rows)))
        .map(|(id, mut group)| {
            group.rows.sort_by_key(|(step, _, _)| *step);
            let steps = group.rows.iter().map(|(step, _, _)| *step).collect();
            let timestamps = group.rows.iter().map(|(_, ts, _)| *ts).collect();
            let columns = signals
                .iter()
                .enumerate()
                .map(|(col, (_, name))| {
                    (name.clone(), group.rows.iter().map(|(_, _, v)| v[col]).collect())
                })
                .collect();
            debug!(series = %id, rows = group.rows.len(), "series loaded");
            Series::new(id, steps, timestamps, group.utc_offset, columns)
        })
        .collect::<DssResult<Vec<Series>>>()?;
    let table = SeriesTable::new(series)?;
    info!(source, series = table.len(), rows = table.total_rows(), "series table loaded");
    Ok(table)
}

/// Reads event annotations from any CSV source.
pub fn read_events<R: Read>(reader: R, source: &str) -> DssResult<EventTable> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv.headers().map_err(|err| csv_error(source, err))?.clone();
    let id_idx = column_index(&headers, SERIES_ID, source)?;
    let event_idx = column_index(&headers, EVENT, source)?;
    let step_idx = column_index(&headers, STEP, source)?;
    let ts_idx = column_index(&headers, TIMESTAMP, source).ok();

    let mut records = Vec::new();
    for record in csv.records() {
        let record = record.map_err(|err| csv_error(source, err))?;
        let line = record.position().map_or(0, |p| p.line());
        let kind = parse_event_kind(EVENT, record.get(event_idx).unwrap_or_default())
            .map_err(|err| DssError::data(format!("line {line}: {err}")))?;
        let step = match record.get(step_idx).unwrap_or_default() {
            "" | "nan" | "NaN" => None,
            raw => Some(parse_field::<f64>(raw, STEP, line)? as u64),
        };
        let mut event = EventRecord::new(record.get(id_idx).unwrap_or_default(), kind, step);
        if let Some(raw) = ts_idx.and_then(|idx| record.get(idx)).filter(|raw| !raw.is_empty()) {
            event = event.with_timestamp(parse_timestamp(raw)?.0);
        }
        records.push(event);
    }
    let table = EventTable::new(records);
    info!(source, events = table.len(), "events loaded");
    Ok(table)
}

pub fn load_series(path: &Path) -> DssResult<SeriesTable> {
    let file = std::fs::File::open(path)
        .map_err(|err| DssError::io(format!("failed to open '{}'", path.display()), err))?;
    read_series(file, &path.display().to_string())
}

pub fn load_events(path: &Path) -> DssResult<EventTable> {
    let file = std::fs::File::open(path)
        .map_err(|err| DssError::io(format!("failed to open '{}'", path.display()), err))?;
    read_events(file, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_timestamp, read_events, read_series};
    use dss_core::{DssError, EventKind};

    #[test]
    fn timestamps_keep_the_local_offset() {
        let (ts, offset) =
            parse_timestamp("2018-08-14T15:30:00-0400").expect("timestamp should parse");
        assert_eq!(ts, 1_534_275_000);
        assert_eq!(offset, -14_400);
        assert_eq!(parse_timestamp("1534275000").expect("seconds should parse"), (1_534_275_000, 0));
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn series_rows_are_grouped_and_sorted_by_step() {
        let raw = "series_id,step,timestamp,anglez,enmo\n\
                   b,1,2018-08-14T15:30:05-0400,2.0,0.1\n\
                   a,0,1000,1.0,\n\
                   b,0,2018-08-14T15:30:00-0400,3.0,0.2\n";
        let table = read_series(raw.as_bytes(), "inline").expect("series should load");
        assert_eq!(table.len(), 2);
        let b = table.get("b").expect("series b should exist");
        assert_eq!(b.steps(), &[0, 1]);
        assert_eq!(b.column("anglez"), Some(&[3.0, 2.0][..]));
        assert_eq!(b.utc_offset_seconds(), -14_400);
        let a = table.get("a").expect("series a should exist");
        assert!(a.column("enmo").map(|c| c[0].is_nan()).unwrap_or(false));
    }

    #[test]
    fn missing_columns_are_data_errors() {
        let err = read_series("series_id,timestamp\na,0\n".as_bytes(), "inline")
            .expect_err("missing step should fail");
        assert!(matches!(err, DssError::Data(_)));
        assert!(err.to_string().contains("step"));
    }

    #[test]
    fn events_allow_missing_steps() {
        let raw = "series_id,night,event,step,timestamp\n\
                   a,1,onset,120,2018-08-14T22:26:00-0400\n\
                   a,1,wakeup,,\n";
        let events = read_events(raw.as_bytes(), "inline").expect("events should load");
        let records = events.for_series("a");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, EventKind::Onset);
        assert_eq!(records[0].step, Some(120));
        assert!(records[1].is_missing());
    }
}
