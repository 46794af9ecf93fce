// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{DssError, DssResult};
use serde::{Deserialize, Serialize};

/// Identifies the series row a prediction row belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub series_id: String,
    pub step: u64,
}

/// Row-major `rows x channels` prediction values for one model.
///
/// Rows follow window order then timestep order inside each window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionStream {
    channels: Vec<String>,
    rows: usize,
    values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    keys: Vec<RowKey>,
}

impl PredictionStream {
    pub fn new(channels: Vec<String>, values: Vec<f64>) -> DssResult<Self> {
        if channels.is_empty() {
            return Err(DssError::data("prediction stream needs at least one channel"));
        }
        if values.len() % channels.len() != 0 {
            return Err(DssError::shape_mismatch(
                "prediction stream values (multiple of channel count)",
                values.len().div_ceil(channels.len()) * channels.len(),
                values.len(),
            ));
        }
        let rows = values.len() / channels.len();
        Ok(Self {
            channels,
            rows,
            values,
            keys: vec![],
        })
    }

    /// Attaches one row key per row.
    pub fn with_keys(mut self, keys: Vec<RowKey>) -> DssResult<Self> {
        if keys.len() != self.rows {
            return Err(DssError::shape_mismatch(
                "prediction stream row keys",
                self.rows,
                keys.len(),
            ));
        }
        self.keys = keys;
        Ok(self)
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Total number of values, `rows * channels`.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.channels.len();
        &self.values[row * width..(row + 1) * width]
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c == name)
    }

    /// Copies one channel out as a column.
    pub fn channel(&self, name: &str) -> DssResult<Vec<f64>> {
        let idx = self.channel_index(name).ok_or_else(|| {
            DssError::data(format!(
                "prediction stream has no channel '{name}'; available: {}",
                self.channels.join(", ")
            ))
        })?;
        Ok(self
            .values
            .chunks_exact(self.channels.len())
            .map(|row| row[idx])
            .collect())
    }

    /// Replaces the values, keeping channels and keys; lengths must match.
    pub fn with_values(&self, values: Vec<f64>) -> DssResult<Self> {
        if values.len() != self.values.len() {
            return Err(DssError::shape_mismatch(
                "prediction stream values",
                self.values.len(),
                values.len(),
            ));
        }
        Ok(Self {
            channels: self.channels.clone(),
            rows: self.rows,
            values,
            keys: self.keys.clone(),
        })
    }
}
