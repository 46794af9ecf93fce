// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, MetricsSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Serialize)]
struct MetricLine<'a> {
    key: &'a str,
    value: f64,
    seq: u64,
    unix_ms: u128,
}

/// Appends one JSON object per recorded scalar.
///
/// Write failures are logged and dropped; metrics never fail a run.
pub struct JsonLinesMetricsSink {
    writer: Mutex<(BufWriter<File>, u64)>,
}

impl JsonLinesMetricsSink {
    pub fn create(path: &Path) -> DssResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                DssError::io(format!("failed to create '{}'", parent.display()), err)
            })?;
        }
        let file = File::create(path)
            .map_err(|err| DssError::io(format!("failed to create '{}'", path.display()), err))?;
        Ok(Self {
            writer: Mutex::new((BufWriter::new(file), 0)),
        })
    }

    pub fn flush(&self) -> DssResult<()> {
        self.writer
            .lock()
            .0
            .flush()
            .map_err(|err| DssError::io("failed to flush metrics", err))
    }
}

impl MetricsSink for JsonLinesMetricsSink {
    fn record_scalar(&self, key: &str, value: f64) {
        let mut guard = self.writer.lock();
        let (writer, seq) = &mut *guard;
        let line = MetricLine {
            key,
            value,
            seq: *seq,
            unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis()),
        };
        *seq += 1;
        let written = serde_json::to_writer(&mut *writer, &line)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(err) = written {
            warn!(key, error = %err, "dropping metric");
        }
    }
}

impl Drop for JsonLinesMetricsSink {
    fn drop(&mut self) {
        if let Err(err) = self.writer.get_mut().0.flush() {
            warn!(error = %err, "failed to flush metrics on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JsonLinesMetricsSink;
    use dss_core::MetricsSink;
    use serde_json::Value;

    #[test]
    fn every_scalar_becomes_one_line() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join("metrics.jsonl");
        let sink = JsonLinesMetricsSink::create(&path).expect("sink should be created");
        sink.record_scalar("train_loss", 0.5);
        sink.record_scalar("valid_loss", 0.75);
        sink.flush().expect("flush should succeed");

        let raw = std::fs::read_to_string(&path).expect("metrics should be readable");
        let lines: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("line should be JSON"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["key"], "train_loss");
        assert_eq!(lines[1]["value"], 0.75);
        assert_eq!(lines[1]["seq"], 1);
    }
}
