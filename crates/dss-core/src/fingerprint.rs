// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::table::{Series, SeriesTable};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 content key for cached artifacts and configuration hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, as printed in logs and model file names.
    pub fn short(&self) -> String {
        let mut full = self.to_hex();
        full.truncate(16);
        full
    }

    /// Hash of a JSON value's canonical text (object keys sorted).
    pub fn of_json(value: &serde_json::Value) -> Self {
        let mut builder = FingerprintBuilder::new("json");
        builder.str(&canonical_json(value));
        builder.finish()
    }

    /// Key of a stage output: stage kind, canonical parameters and input key.
    pub fn of_stage(kind: &str, params: &serde_json::Value, input: Fingerprint) -> Self {
        let mut builder = FingerprintBuilder::new("stage");
        builder.str(kind);
        builder.str(&canonical_json(params));
        builder.bytes(input.as_bytes());
        builder.finish()
    }

    /// Content hash of a full table, including labels and window layouts.
    pub fn of_table(table: &SeriesTable) -> Self {
        let mut builder = FingerprintBuilder::new("table");
        builder.u64(table.len() as u64);
        for series in table.series() {
            hash_series(&mut builder, series);
        }
        builder.finish()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn hash_series(builder: &mut FingerprintBuilder, series: &Series) {
    builder.str(series.id());
    builder.u64(series.len() as u64);
    builder.u64(series.utc_offset_seconds() as i64 as u64);
    for &step in series.steps() {
        builder.u64(step);
    }
    for &ts in series.timestamps() {
        builder.u64(ts as u64);
    }
    builder.u64(series.columns().len() as u64);
    for (name, values) in series.columns() {
        builder.str(name);
        for &v in values {
            builder.f64(v);
        }
    }
    match series.state() {
        Some(state) => {
            builder.u64(1);
            let codes: Vec<u8> = state.iter().map(|s| s.code()).collect();
            builder.bytes(&codes);
        }
        None => builder.u64(0),
    }
    builder.u64(series.targets().len() as u64);
    for (name, values) in series.targets() {
        builder.str(name);
        for &v in values {
            builder.f64(v);
        }
    }
    match series.windows() {
        Some(layout) => {
            builder.u64(layout.size as u64);
            builder.u64(layout.starts.len() as u64);
            for &start in &layout.starts {
                builder.u64(start as u64);
            }
        }
        None => builder.u64(u64::MAX),
    }
}

/// Incremental, length-prefixed hasher so adjacent fields cannot collide.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.str(domain);
        builder
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn str(&mut self, value: &str) {
        self.bytes(value.as_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// All NaN payloads hash alike; `-0.0` and `0.0` stay distinct.
    pub fn f64(&mut self, value: f64) {
        let bits = if value.is_nan() {
            f64::NAN.to_bits()
        } else {
            value.to_bits()
        };
        self.u64(bits);
    }

    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

/// JSON text with object keys sorted recursively.
pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(v)
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Fingerprint, canonical_json};
    use crate::table::{Series, SeriesTable};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn table(value: f64) -> SeriesTable {
        let mut columns = BTreeMap::new();
        columns.insert("anglez".to_string(), vec![value, 1.0]);
        let series = Series::new("a", vec![0, 1], vec![0, 5], 0, columns)
            .expect("series should be valid");
        SeriesTable::new(vec![series]).expect("table should be valid")
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn json_fingerprint_ignores_key_order() {
        let a = json!({"window_size": 4, "stride": 2});
        let b = json!({"stride": 2, "window_size": 4});
        assert_eq!(Fingerprint::of_json(&a), Fingerprint::of_json(&b));
        assert_ne!(
            Fingerprint::of_json(&a),
            Fingerprint::of_json(&json!({"window_size": 4, "stride": 3}))
        );
    }

    #[test]
    fn stage_fingerprint_depends_on_every_input() {
        let input = Fingerprint::of_table(&table(0.0));
        let params = json!({"window_size": 4});
        let base = Fingerprint::of_stage("split_windows", &params, input);
        assert_eq!(base, Fingerprint::of_stage("split_windows", &params, input));
        assert_ne!(base, Fingerprint::of_stage("remove_unlabeled", &params, input));
        assert_ne!(
            base,
            Fingerprint::of_stage("split_windows", &json!({"window_size": 8}), input)
        );
        assert_ne!(
            base,
            Fingerprint::of_stage("split_windows", &params, Fingerprint::of_table(&table(1.0)))
        );
    }

    #[test]
    fn table_fingerprint_is_content_based() {
        assert_eq!(Fingerprint::of_table(&table(0.5)), Fingerprint::of_table(&table(0.5)));
        assert_eq!(
            Fingerprint::of_table(&table(f64::NAN)),
            Fingerprint::of_table(&table(f64::NAN))
        );
        assert_ne!(Fingerprint::of_table(&table(0.5)), Fingerprint::of_table(&table(0.25)));
    }

    #[test]
    fn short_form_is_sixteen_hex_chars() {
        let fp = Fingerprint::of_json(&json!({}));
        assert_eq!(fp.short().len(), 16);
        assert!(fp.to_hex().starts_with(&fp.short()));
    }
}
