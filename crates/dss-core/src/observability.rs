// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use parking_lot::Mutex;

/// Receives coarse progress in `[0, 1]`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f32);
}

/// Receives named scalar metrics (per-epoch losses, fold scores, trial scores).
pub trait MetricsSink: Send + Sync {
    fn record_scalar(&self, key: &str, value: f64);
}

/// In-memory sink; keeps every recorded value in arrival order.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    values: Mutex<Vec<(String, f64)>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(String, f64)> {
        self.values.lock().clone()
    }

    /// Values recorded under `key`, in arrival order.
    pub fn values_for(&self, key: &str) -> Vec<f64> {
        self.values
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record_scalar(&self, key: &str, value: f64) {
        self.values.lock().push((key.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryMetricsSink, MetricsSink};

    #[test]
    fn memory_sink_keeps_arrival_order() {
        let sink = MemoryMetricsSink::new();
        sink.record_scalar("train_loss", 0.5);
        sink.record_scalar("valid_loss", 0.7);
        sink.record_scalar("train_loss", 0.25);

        assert_eq!(sink.values_for("train_loss"), vec![0.5, 0.25]);
        assert_eq!(sink.snapshot().len(), 3);
        assert!(sink.values_for("missing").is_empty());
    }
}
