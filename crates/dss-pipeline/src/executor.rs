// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::cache::{ArtifactCache, CachedStage};
use crate::registry::PipelineStage;
use dss_core::{
    DssError, DssResult, ErrorCategory, EventTable, ExecutionContext, Fingerprint,
    FingerprintBuilder, SeriesTable, TableStage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a failing series does to the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesFailurePolicy {
    /// The first stage failure aborts the run.
    #[default]
    Abort,
    /// The failing series is dropped and reported; the run continues.
    SkipSeries,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub index: usize,
    pub kind: String,
    pub fingerprint: String,
    pub cache_hit: bool,
    pub series_in: usize,
    pub series_out: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedSeries {
    pub series_id: String,
    pub stage_index: usize,
    pub stage_kind: String,
    pub category: ErrorCategory,
    pub message: String,
}

/// Result of one executor run.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub table: Arc<SeriesTable>,
    pub fingerprint: Fingerprint,
    pub stages: Vec<StageReport>,
    pub skipped: Vec<SkippedSeries>,
    pub elapsed_ms: u64,
}

/// Applies resolved stages in declared order, caching every stage output.
#[derive(Clone, Debug)]
pub struct PipelineExecutor {
    stages: Vec<PipelineStage>,
    policy: SeriesFailurePolicy,
}

/// Key of the raw input: table content plus the events that label it.
pub fn input_fingerprint(table: &SeriesTable, events: &EventTable) -> DssResult<Fingerprint> {
    let events = serde_json::to_value(events).map_err(|err| DssError::json("encoding events", err))?;
    let mut builder = FingerprintBuilder::new("pipeline-input");
    builder.bytes(Fingerprint::of_table(table).as_bytes());
    builder.bytes(Fingerprint::of_json(&events).as_bytes());
    Ok(builder.finish())
}

fn skip_series_key(stage_key: Fingerprint) -> Fingerprint {
    let mut builder = FingerprintBuilder::new("skip-series");
    builder.bytes(stage_key.as_bytes());
    builder.finish()
}

impl PipelineExecutor {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self {
            stages,
            policy: SeriesFailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: SeriesFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn failure_policy(&self) -> SeriesFailurePolicy {
        self.policy
    }

    /// Runs every stage over `table`.
    ///
    /// Stage `i` is looked up in `cache` under
    /// `Fingerprint::of_stage(kind, params, key of stage i-1's output)`; only
    /// misses are computed. Cancellation is checked between stages.
    pub fn run(
        &self,
        table: SeriesTable,
        events: &EventTable,
        cache: &ArtifactCache,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<PipelineRun> {
        let started_at = Instant::now();
        let mut key = input_fingerprint(&table, events)?;
        let mut current = Arc::new(table);
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut skipped = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            ctx.check_cancelled()?;
            let kind = stage.kind();
            let stage_key = Fingerprint::of_stage(kind, &stage.params(), key);
            let lenient_key = skip_series_key(stage_key);
            let series_in = current.len();

            // Outputs that lost series live under a key only lenient runs
            // look up, so an aborting run never sees them.
            let hit = match cache.get(&stage_key) {
                Some(entry) => Some((stage_key, entry)),
                None if self.policy == SeriesFailurePolicy::SkipSeries => {
                    cache.get(&lenient_key).map(|entry| (lenient_key, entry))
                }
                None => None,
            };
            let (output_key, cache_hit) = match hit {
                Some((hit_key, entry)) => {
                    skipped.extend(entry.skipped.iter().cloned());
                    current = Arc::clone(&entry.table);
                    (hit_key, true)
                }
                None => {
                    let input = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
                    let mut failures = Vec::new();
                    let output = self.apply(index, stage, input, events, &mut failures)?;
                    let output_key = if failures.is_empty() {
                        stage_key
                    } else {
                        lenient_key
                    };
                    cache.record_computation(output_key);
                    let entry = cache.insert(
                        output_key,
                        CachedStage {
                            table: Arc::new(output),
                            skipped: failures.clone(),
                        },
                    );
                    skipped.extend(failures);
                    current = Arc::clone(&entry.table);
                    (output_key, false)
                }
            };
            debug!(
                index,
                kind,
                cache_hit,
                series = current.len(),
                fingerprint = %output_key.short(),
                "stage done"
            );
            reports.push(StageReport {
                index,
                kind: kind.to_string(),
                fingerprint: output_key.short(),
                cache_hit,
                series_in,
                series_out: current.len(),
            });
            key = output_key;
            ctx.report_progress((index + 1) as f32 / self.stages.len() as f32);
        }

        let elapsed_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            stages = self.stages.len(),
            series = current.len(),
            rows = current.total_rows(),
            skipped = skipped.len(),
            elapsed_ms,
            "pipeline run finished"
        );
        Ok(PipelineRun {
            table: current,
            fingerprint: key,
            stages: reports,
            skipped,
            elapsed_ms,
        })
    }

    fn apply(
        &self,
        index: usize,
        stage: &PipelineStage,
        table: SeriesTable,
        events: &EventTable,
        skipped: &mut Vec<SkippedSeries>,
    ) -> DssResult<SeriesTable> {
        let kind = stage.kind();
        let run_series = |series: dss_core::Series| {
            let id = series.id().to_string();
            stage.transform_series(series, events.for_series(&id))
        };
        match self.policy {
            SeriesFailurePolicy::Abort => table
                .try_map_series(run_series)
                .map_err(|(series_id, err)| err.in_stage(index, kind, Some(&series_id))),
            SeriesFailurePolicy::SkipSeries => {
                let (table, failures) = table.map_series_lenient(run_series);
                for (series_id, err) in failures {
                    warn!(
                        index,
                        kind,
                        series = %series_id,
                        error = %err,
                        "series skipped after stage failure"
                    );
                    skipped.push(SkippedSeries {
                        series_id,
                        stage_index: index,
                        stage_kind: kind.to_string(),
                        category: err.category(),
                        message: err.to_string(),
                    });
                }
                Ok(table)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineExecutor, SeriesFailurePolicy};
    use crate::cache::ArtifactCache;
    use crate::config::StageDescriptor;
    use crate::registry::StageRegistry;
    use dss_core::{
        DssError, EventKind, EventRecord, EventTable, ExecutionContext, Series, SeriesTable,
        StateLabel,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn series(id: &str, rows: usize, column: &str) -> Series {
        let mut columns = BTreeMap::new();
        columns.insert(column.to_string(), (0..rows).map(|i| i as f64).collect());
        Series::new(
            id,
            (0..rows as u64).collect(),
            (0..rows as i64).map(|i| 1_534_285_805 + 5 * i).collect(),
            0,
            columns,
        )
        .expect("series should be valid")
    }

    fn executor(features: &[StageDescriptor]) -> PipelineExecutor {
        let stages = StageRegistry::with_builtin()
            .resolve_all(
                &[
                    StageDescriptor::new("add_state_labels", json!({})),
                    StageDescriptor::new("split_windows", json!({"window_size": 4})),
                ],
                features,
            )
            .expect("stages should resolve");
        PipelineExecutor::new(stages)
    }

    fn events() -> EventTable {
        EventTable::new(vec![
            EventRecord::new("a", EventKind::Onset, Some(1)),
            EventRecord::new("a", EventKind::Wakeup, Some(3)),
        ])
    }

    #[test]
    fn applies_stages_in_order_and_labels_rows() {
        let table = SeriesTable::new(vec![series("a", 4, "anglez")]).expect("valid table");
        let run = executor(&[])
            .run(table, &events(), &ArtifactCache::new(), &ExecutionContext::new())
            .expect("run should succeed");
        let out = &run.table.series()[0];
        assert_eq!(
            out.state(),
            Some(
                &[
                    StateLabel::Awake,
                    StateLabel::Asleep,
                    StateLabel::Asleep,
                    StateLabel::Awake
                ][..]
            )
        );
        assert_eq!(out.windows().map(|w| w.starts.clone()), Some(vec![0]));
        assert_eq!(run.stages.len(), 2);
        assert!(run.stages.iter().all(|s| !s.cache_hit));
    }

    #[test]
    fn identical_reruns_hit_the_cache() {
        let table = SeriesTable::new(vec![series("a", 8, "anglez")]).expect("valid table");
        let cache = ArtifactCache::new();
        let exec = executor(&[]);
        let first = exec
            .run(table.clone(), &events(), &cache, &ExecutionContext::new())
            .expect("first run should succeed");
        let second = exec
            .run(table, &events(), &cache, &ExecutionContext::new())
            .expect("second run should succeed");
        assert!(second.stages.iter().all(|s| s.cache_hit));
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(cache.computations(&first.fingerprint), 1);
        assert_eq!(cache.total_computations(), 2);
    }

    #[test]
    fn stage_failures_abort_or_skip() {
        let table = SeriesTable::new(vec![series("a", 8, "anglez"), series("b", 8, "enmo")])
            .expect("valid table");
        let features = [StageDescriptor::new(
            "parser",
            json!({"feature_names": ["f_anglez_diff"]}),
        )];

        let err = executor(&features)
            .run(
                table.clone(),
                &events(),
                &ArtifactCache::new(),
                &ExecutionContext::new(),
            )
            .expect_err("missing column should abort");
        match err {
            DssError::StageExecution {
                index,
                kind,
                series_id,
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(kind, "parser");
                assert_eq!(series_id.as_deref(), Some("b"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let run = executor(&features)
            .with_failure_policy(SeriesFailurePolicy::SkipSeries)
            .run(table, &events(), &ArtifactCache::new(), &ExecutionContext::new())
            .expect("skip policy should continue");
        assert_eq!(run.table.series_ids(), vec!["a".to_string()]);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].series_id, "b");
        assert_eq!(run.skipped[0].stage_kind, "parser");
    }

    #[test]
    fn shared_cache_keeps_skips_apart_from_aborting_runs() {
        let table = SeriesTable::new(vec![series("a", 8, "anglez"), series("b", 8, "enmo")])
            .expect("valid table");
        let features = [StageDescriptor::new(
            "parser",
            json!({"feature_names": ["f_anglez_diff"]}),
        )];
        let cache = ArtifactCache::new();
        let lenient = executor(&features).with_failure_policy(SeriesFailurePolicy::SkipSeries);

        let first = lenient
            .run(table.clone(), &events(), &cache, &ExecutionContext::new())
            .expect("skip policy should continue");
        assert_eq!(first.skipped.len(), 1);

        let rerun = lenient
            .run(table.clone(), &events(), &cache, &ExecutionContext::new())
            .expect("cached skip run should succeed");
        assert!(rerun.stages.iter().all(|s| s.cache_hit));
        assert_eq!(rerun.skipped, first.skipped);
        assert_eq!(rerun.fingerprint, first.fingerprint);

        let err = executor(&features)
            .run(table, &events(), &cache, &ExecutionContext::new())
            .expect_err("an aborting run must not reuse a table with dropped series");
        assert!(matches!(err, DssError::StageExecution { ref series_id, .. }
            if series_id.as_deref() == Some("b")));
        // the two label stages are shared, the parser output is not
        assert_eq!(cache.total_computations(), 3);
    }
}
