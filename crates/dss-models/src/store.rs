// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::ModelArtifact;
use dss_core::{DssError, DssResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub const MODEL_ENVELOPE_SCHEMA_VERSION: u32 = 1;

/// On-disk wrapper around a model artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub schema_version: u32,
    pub model_name: String,
    pub config_hash: String,
    pub created_at_ns: i64,
    pub payload_crc32: u32,
    /// JSON-encoded [`ModelArtifact`].
    pub payload: String,
}

impl ModelEnvelope {
    fn verify(&self) -> DssResult<()> {
        if self.schema_version != MODEL_ENVELOPE_SCHEMA_VERSION {
            return Err(DssError::data(format!(
                "model envelope schema_version={} is unsupported; expected {}",
                self.schema_version, MODEL_ENVELOPE_SCHEMA_VERSION
            )));
        }
        let observed = crc32fast::hash(self.payload.as_bytes());
        if observed != self.payload_crc32 {
            return Err(DssError::data(format!(
                "model payload crc32 mismatch: expected=0x{:08x}, observed=0x{observed:08x}",
                self.payload_crc32
            )));
        }
        Ok(())
    }
}

/// Directory of trained models keyed by `<name>-<config hash>.json`.
#[derive(Clone, Debug)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, model_name: &str, config_hash: &str) -> PathBuf {
        self.root.join(format!("{model_name}-{config_hash}.json"))
    }

    pub fn contains(&self, model_name: &str, config_hash: &str) -> bool {
        self.path_for(model_name, config_hash).is_file()
    }

    /// Writes the artifact atomically (temp file, fsync, rename).
    pub fn save(
        &self,
        model_name: &str,
        config_hash: &str,
        artifact: &ModelArtifact,
    ) -> DssResult<PathBuf> {
        self.save_document(model_name, config_hash, artifact)
    }

    pub fn load(&self, model_name: &str, config_hash: &str) -> DssResult<ModelArtifact> {
        self.load_document(model_name, config_hash)
    }

    /// Stores any serializable state that has to travel with the models,
    /// such as a fitted scaler, in the same CRC-checked envelope.
    pub fn save_document<T: Serialize>(
        &self,
        name: &str,
        config_hash: &str,
        document: &T,
    ) -> DssResult<PathBuf> {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            return Err(DssError::config(
                "models",
                format!("model name '{name}' cannot be used as a file name"),
            ));
        }
        std::fs::create_dir_all(&self.root).map_err(|err| {
            DssError::io(
                format!("failed creating model store '{}'", self.root.display()),
                err,
            )
        })?;

        let payload = serde_json::to_string(document)
            .map_err(|err| DssError::json(format!("encoding '{name}'"), err))?;
        let envelope = ModelEnvelope {
            schema_version: MODEL_ENVELOPE_SCHEMA_VERSION,
            model_name: name.to_string(),
            config_hash: config_hash.to_string(),
            created_at_ns: now_unix_ns(),
            payload_crc32: crc32fast::hash(payload.as_bytes()),
            payload,
        };
        let encoded = serde_json::to_vec_pretty(&envelope)
            .map_err(|err| DssError::json("encoding model envelope", err))?;

        let path = self.path_for(name, config_hash);
        write_file_atomic(&path, &encoded)?;
        info!(name, path = %path.display(), "artifact saved");
        Ok(path)
    }

    pub fn load_document<T: DeserializeOwned>(&self, name: &str, config_hash: &str) -> DssResult<T> {
        let path = self.path_for(name, config_hash);
        let encoded = std::fs::read(&path).map_err(|err| {
            DssError::io(format!("failed reading '{}'", path.display()), err)
        })?;
        let envelope: ModelEnvelope = serde_json::from_slice(&encoded).map_err(|err| {
            DssError::json(format!("failed parsing '{}'", path.display()), err)
        })?;
        envelope.verify()?;
        if envelope.model_name != name || envelope.config_hash != config_hash {
            return Err(DssError::data(format!(
                "model file '{}' holds '{}-{}'",
                path.display(),
                envelope.model_name,
                envelope.config_hash
            )));
        }
        serde_json::from_str(&envelope.payload)
            .map_err(|err| DssError::json(format!("decoding '{name}'"), err))
    }
}

fn now_unix_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or_default()
}

fn write_file_atomic(path: &Path, encoded: &[u8]) -> DssResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if file_name.is_empty() {
        return Err(DssError::config(
            "model_store_loc",
            format!("path '{}' must include a file name", path.display()),
        ));
    }

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let temp_path = parent.join(format!("{file_name}.tmp-{}-{suffix}", process::id()));

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|err| {
            DssError::io(
                format!("failed creating temp file '{}'", temp_path.display()),
                err,
            )
        })?;

    if let Err(err) = file.write_all(encoded) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(DssError::io(
            format!("failed writing temp file '{}'", temp_path.display()),
            err,
        ));
    }

    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(DssError::io(
            format!("failed fsync on temp file '{}'", temp_path.display()),
            err,
        ));
    }

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(DssError::io(
            format!("failed renaming temp file to '{}'", path.display()),
            err,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ModelEnvelope, ModelStore};
    use crate::model::ModelArtifact;
    use crate::spec::ModelSpec;
    use dss_core::DssError;

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            model_type: "mean-baseline".into(),
            spec: ModelSpec::new("mean-baseline"),
            feature_names: vec!["f_anglez".into()],
            target_names: vec!["event_onset".into()],
            state: serde_json::json!({"means": [0.25]}),
        }
    }

    #[test]
    fn save_then_load_returns_the_artifact() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = ModelStore::new(dir.path().join("tm"));
        let path = store
            .save("baseline", "0123abcd", &artifact())
            .expect("save should succeed");
        assert_eq!(path, dir.path().join("tm").join("baseline-0123abcd.json"));
        assert!(store.contains("baseline", "0123abcd"));
        let loaded = store
            .load("baseline", "0123abcd")
            .expect("load should succeed");
        assert_eq!(loaded, artifact());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("tm"))
            .expect("store dir should be readable")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = ModelStore::new(dir.path());
        let path = store
            .save("baseline", "abc", &artifact())
            .expect("save should succeed");
        let raw = std::fs::read(&path).expect("model file should be readable");
        let mut envelope: ModelEnvelope =
            serde_json::from_slice(&raw).expect("envelope should parse");
        envelope.payload = envelope.payload.replace("0.25", "0.75");
        std::fs::write(&path, serde_json::to_vec(&envelope).expect("envelope should encode"))
            .expect("corrupted file should be written");

        let err = store
            .load("baseline", "abc")
            .expect_err("corrupted payload should fail");
        assert!(err.to_string().contains("crc32 mismatch"));
    }

    #[test]
    fn documents_share_the_envelope_and_its_checks() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = ModelStore::new(dir.path());
        let params = std::collections::BTreeMap::from([("f_anglez".to_string(), (1.5, 2.0))]);
        store
            .save_document("scaler", "feed", &params)
            .expect("document should save");
        let loaded: std::collections::BTreeMap<String, (f64, f64)> = store
            .load_document("scaler", "feed")
            .expect("document should load");
        assert_eq!(loaded, params);

        let err = store
            .load_document::<ModelArtifact>("scaler", "feed")
            .expect_err("a scaler is not a model artifact");
        assert!(matches!(err, DssError::Json { .. }));
    }

    #[test]
    fn missing_model_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let err = ModelStore::new(dir.path())
            .load("nope", "abc")
            .expect_err("missing file should fail");
        assert!(matches!(err, DssError::Io { .. }));
    }
}
