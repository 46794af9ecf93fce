// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::executor::SkippedSeries;
use dss_core::{Fingerprint, SeriesTable};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One stage output together with the series the stage dropped on failure,
/// so a cache hit reports the same skips as the run that computed it.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedStage {
    pub table: Arc<SeriesTable>,
    pub skipped: Vec<SkippedSeries>,
}

impl CachedStage {
    pub fn clean(table: Arc<SeriesTable>) -> Self {
        Self {
            table,
            skipped: Vec::new(),
        }
    }
}

/// Stage outputs keyed by `Fingerprint(kind, params, input)`.
///
/// Inserts keep the first value for a key, so re-deriving an identical
/// output never replaces an existing entry.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: RwLock<HashMap<Fingerprint, Arc<CachedStage>>>,
    computations: Mutex<HashMap<Fingerprint, usize>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Fingerprint) -> Option<Arc<CachedStage>> {
        self.entries.read().get(key).map(Arc::clone)
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.get(key).is_some()
    }

    /// Stores `value` unless the key is present; returns the stored value.
    pub fn insert(&self, key: Fingerprint, value: CachedStage) -> Arc<CachedStage> {
        Arc::clone(self.entries.write().entry(key).or_insert_with(|| Arc::new(value)))
    }

    pub fn record_computation(&self, key: Fingerprint) {
        *self.computations.lock().entry(key).or_default() += 1;
    }

    pub fn computations(&self, key: &Fingerprint) -> usize {
        self.computations.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_computations(&self) -> usize {
        self.computations.lock().values().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.computations.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactCache, CachedStage};
    use dss_core::{Fingerprint, SeriesTable};
    use serde_json::json;
    use std::sync::Arc;

    fn key(n: u64) -> Fingerprint {
        Fingerprint::of_json(&json!({ "n": n }))
    }

    #[test]
    fn first_insert_wins() {
        let cache = ArtifactCache::new();
        let first = Arc::new(SeriesTable::default());
        let stored = cache.insert(key(1), CachedStage::clean(Arc::clone(&first)));
        assert!(Arc::ptr_eq(&stored.table, &first));
        let again = cache.insert(key(1), CachedStage::clean(Arc::new(SeriesTable::default())));
        assert!(Arc::ptr_eq(&again.table, &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn computations_are_counted_per_key() {
        let cache = ArtifactCache::new();
        cache.record_computation(key(1));
        cache.record_computation(key(2));
        cache.record_computation(key(2));
        assert_eq!(cache.computations(&key(1)), 1);
        assert_eq!(cache.computations(&key(2)), 2);
        assert_eq!(cache.computations(&key(3)), 0);
        assert_eq!(cache.total_computations(), 3);
        assert!(cache.is_empty());

        cache.insert(key(1), CachedStage::clean(Arc::new(SeriesTable::default())));
        cache.clear();
        assert!(cache.is_empty() && cache.total_computations() == 0);
    }
}
