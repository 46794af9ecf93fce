// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{
    CancelToken, DssError, ErrorCategory, EventKind, EventRecord, EventTable, ExecutionContext,
    MemoryMetricsSink, Series, SeriesTable, StateLabel,
};
use dss_models::{ModelRegistry, ModelStore};
use dss_pipeline::{
    ArtifactCache, Configuration, Pipeline, SUBMISSION_PREFIX, SeriesFailurePolicy,
    StageRegistry, load_scaler, pretrain,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

const ROWS: usize = 64;

fn series(id: &str, onset: usize, wakeup: usize, shift: f64) -> Series {
    let mut columns = BTreeMap::new();
    columns.insert(
        "anglez".to_string(),
        (0..ROWS)
            .map(|i| {
                shift
                    + if (onset..wakeup).contains(&i) {
                        -60.0 + (i % 3) as f64
                    } else {
                        20.0 * (0.3 * i as f64).sin()
                    }
            })
            .collect(),
    );
    columns.insert(
        "enmo".to_string(),
        (0..ROWS)
            .map(|i| if (onset..wakeup).contains(&i) { 0.0 } else { 0.05 + 0.01 * (i % 5) as f64 })
            .collect(),
    );
    Series::new(
        id,
        (0..ROWS as u64).collect(),
        (0..ROWS as i64).map(|i| 1_534_285_805 + 5 * i).collect(),
        -14_400,
        columns,
    )
    .expect("series should be valid")
}

fn dataset() -> (SeriesTable, EventTable) {
    dataset_shifted(0.0)
}

/// Same recordings with `anglez` moved by `shift` degrees.
fn dataset_shifted(shift: f64) -> (SeriesTable, EventTable) {
    let layout = [("a", 10, 40), ("b", 16, 48), ("c", 8, 30), ("d", 20, 52), ("e", 12, 44)];
    let table = SeriesTable::new(
        layout
            .iter()
            .map(|(id, onset, wakeup)| series(id, *onset, *wakeup, shift))
            .collect(),
    )
    .expect("table should be valid");
    let events = EventTable::new(layout.iter().flat_map(|(id, onset, wakeup)| {
        [
            EventRecord::new(*id, EventKind::Onset, Some(*onset as u64)),
            EventRecord::new(*id, EventKind::Wakeup, Some(*wakeup as u64)),
        ]
    }));
    (table, events)
}

fn raw_config(store: &std::path::Path) -> Value {
    json!({
        "preprocessing": [
            {"kind": "add_state_labels"},
            {"kind": "add_event_labels", "smoothing": 4.0, "steepness": 2.0},
            {"kind": "split_windows", "window_size": 16}
        ],
        "feature_engineering": [
            {"kind": "parser", "feature_names": ["f_anglez", "f_enmo_diff", "f_anglez_std5"]},
            {"kind": "time", "time_features": ["hour", "weekday"]}
        ],
        "pretraining": {
            "downsample": {"factor": 2, "features": ["f_anglez", "f_enmo_diff", "f_anglez_std5"]},
            "scaler": {"kind": "standard"},
            "test_size": 0.4
        },
        "models": {
            "base": {"type": "mean-baseline"},
            "lin": {"type": "linear", "epochs": 3, "batch_size": 8, "lr": 0.01}
        },
        "ensemble": {"models": ["base", "lin"], "weights": [0.5, 0.5], "comb_method": "weighted_average"},
        "scoring": true,
        "seed": 7,
        "model_store_loc": store
    })
}

fn pipeline(raw: Value) -> Pipeline {
    let config = Configuration::from_json_value(raw).expect("configuration should parse");
    Pipeline::new(config, &StageRegistry::with_builtin(), ModelRegistry::with_builtin())
        .expect("pipeline should build")
}

#[test]
fn state_labels_follow_the_onset_wakeup_pairs() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let pipeline = pipeline(raw_config(dir.path()));
    let (table, events) = dataset();
    let run = pipeline
        .preprocess(table, &events, &ExecutionContext::new())
        .expect("preprocessing should succeed");
    let a = run
        .table
        .series()
        .iter()
        .find(|s| s.id() == "a")
        .expect("series a should survive");
    let state = a.state().expect("state should be labeled");
    assert_eq!(state[9], StateLabel::Awake);
    assert_eq!(state[10], StateLabel::Asleep);
    assert_eq!(state[39], StateLabel::Asleep);
    assert_eq!(state[40], StateLabel::Awake);
    assert_eq!(a.target("event_onset").map(|t| t[10]), Some(1.0));
    assert!(a.column("f_enmo_diff").is_some());
    assert_eq!(a.windows().map(|w| w.starts.len()), Some(4));
}

#[test]
fn full_run_trains_saves_and_scores() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let pipeline = pipeline(raw_config(dir.path()));
    let (table, events) = dataset();
    let metrics = MemoryMetricsSink::default();
    let ctx = ExecutionContext::new().with_metrics_sink(&metrics);

    let report = pipeline
        .run(table, &events, &ctx)
        .expect("pipeline run should succeed");
    assert_eq!(report.stages.len(), 5);
    assert_eq!(report.models.len(), 2);
    for model in &report.models {
        let path = model.path.as_ref().expect("trained models should be saved");
        assert!(path.exists());
        assert!(model.summary.is_some());
    }
    let score = report.score.as_ref().expect("scoring should produce a report");
    assert!((0.0..=1.0).contains(&score.score));
    assert_eq!(score.eval_series, 2);
    assert!(score.mse.is_some());
    assert_eq!(metrics.values_for("score.event_ap"), vec![score.score]);
}

#[test]
fn identical_runs_are_deterministic() {
    let (table, events) = dataset();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut first = pipeline(raw_config(dir.path()))
        .run(table.clone(), &events, &ExecutionContext::new())
        .expect("first run should succeed");
    let mut second = pipeline(raw_config(dir.path()))
        .run(table, &events, &ExecutionContext::new())
        .expect("second run should succeed");

    first.elapsed_ms = 0;
    second.elapsed_ms = 0;
    assert_eq!(first, second);
}

#[test]
fn shared_cache_computes_each_stage_once() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let cache = Arc::new(ArtifactCache::new());
    let (table, events) = dataset();
    let first = pipeline(raw_config(dir.path()))
        .with_cache(Arc::clone(&cache))
        .preprocess(table.clone(), &events, &ExecutionContext::new())
        .expect("first preprocessing should succeed");

    let mut raw = raw_config(dir.path());
    raw["models"]["lin"]["lr"] = json!(0.05);
    let second = pipeline(raw)
        .with_cache(Arc::clone(&cache))
        .preprocess(table, &events, &ExecutionContext::new())
        .expect("second preprocessing should succeed");

    assert!(second.stages.iter().all(|stage| stage.cache_hit));
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(cache.computations(&second.fingerprint), 1);
    assert_eq!(cache.total_computations(), 5);
}

#[test]
fn weight_count_mismatch_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut raw = raw_config(dir.path());
    raw["ensemble"]["weights"] = json!([1.0]);
    let err = Configuration::from_json_value(raw).expect_err("mismatched weights should fail");
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.to_string().contains("weights"));
}

#[test]
fn unknown_stage_kind_fails_before_execution() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut raw = raw_config(dir.path());
    raw["feature_engineering"][1] = json!({"kind": "lunar_phase"});
    let config = Configuration::from_json_value(raw).expect("configuration should parse");
    let err = Pipeline::new(config, &StageRegistry::with_builtin(), ModelRegistry::with_builtin())
        .expect_err("unknown kind should fail");
    match err {
        DssError::UnknownStageKind { kind, .. } => assert_eq!(kind, "lunar_phase"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn failing_series_are_skipped_when_asked() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (table, events) = dataset();
    let broken = Series::new(
        "z",
        (0..ROWS as u64).collect(),
        (0..ROWS as i64).map(|i| 1_534_285_805 + 5 * i).collect(),
        0,
        BTreeMap::from([("anglez".to_string(), vec![0.0; ROWS])]),
    )
    .expect("series should be valid");
    let mut all = table.into_series();
    all.push(broken);
    let table = SeriesTable::new(all).expect("table should be valid");

    let err = pipeline(raw_config(dir.path()))
        .preprocess(table.clone(), &events, &ExecutionContext::new())
        .expect_err("missing enmo should abort");
    match err {
        DssError::StageExecution {
            kind, series_id, ..
        } => {
            assert_eq!(kind, "parser");
            assert_eq!(series_id.as_deref(), Some("z"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let run = pipeline(raw_config(dir.path()))
        .with_failure_policy(SeriesFailurePolicy::SkipSeries)
        .preprocess(table, &events, &ExecutionContext::new())
        .expect("skip policy should continue");
    assert_eq!(run.table.len(), 5);
    assert_eq!(run.skipped.len(), 1);
    assert_eq!(run.skipped[0].series_id, "z");
}

#[test]
fn cross_validation_scores_every_fold() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut raw = raw_config(dir.path());
    raw["cv"] = json!({"apply": true, "method": {"kind": "group_k_fold", "n_splits": 5}});
    let (table, events) = dataset();
    let cache = Arc::new(ArtifactCache::new());
    let pipeline = pipeline(raw).with_cache(Arc::clone(&cache));
    let report = pipeline
        .cross_validate(table.clone(), &events, &ExecutionContext::new())
        .expect("cross-validation should succeed");
    assert_eq!(report.folds.len(), 5);
    assert_eq!(report.completed + report.failed, 5);
    assert!(report.folds.iter().all(|f| f.fold.test.len() == 1));

    // Folds share one preprocessed table and never write the cache.
    let stages = pipeline.stage_kinds().len();
    assert_eq!(cache.len(), stages);
    assert_eq!(cache.total_computations(), stages);

    let again = pipeline
        .cross_validate(table, &events, &ExecutionContext::new())
        .expect("repeated cross-validation should succeed");
    assert_eq!(again.scores(), report.scores());
    assert_eq!(cache.total_computations(), stages);
}

#[test]
fn hyperparameter_search_keeps_the_best_trial() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut raw = raw_config(dir.path());
    raw["hpo"] = json!({
        "apply": true,
        "method": {"kind": "grid"},
        "space": {"lin.lr": {"type": "choice", "values": [0.001, 0.01]}},
        "parallel_trials": 2
    });
    let (table, events) = dataset();
    let report = pipeline(raw)
        .run(table, &events, &ExecutionContext::new())
        .expect("tuning run should succeed");
    assert!(report.models.is_empty());
    let hpo = report.hpo.expect("hpo report should exist");
    assert_eq!(hpo.trials.len(), 2);
    let best = hpo.best_params.expect("a trial should complete");
    assert!(best.contains_key("lin.lr"));
}

#[test]
fn cancelled_runs_stop_with_a_cancelled_error() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let cancel = CancelToken::new();
    cancel.cancel();
    let (table, events) = dataset();
    let err = pipeline(raw_config(dir.path()))
        .run(table, &events, &ExecutionContext::new().with_cancel(&cancel))
        .expect_err("cancelled run should fail");
    assert!(matches!(err, DssError::Cancelled));
}

#[test]
fn prediction_only_runs_restore_saved_models_and_submission_models_are_stored() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (table, events) = dataset();
    let mut raw = raw_config(dir.path());
    raw["train_for_submission"] = json!(true);
    let trained = pipeline(raw)
        .run(table.clone(), &events, &ExecutionContext::new())
        .expect("training run should succeed");
    assert_eq!(trained.submission.len(), 2);
    let store = ModelStore::new(dir.path());
    for model in &trained.submission {
        assert!(store.contains(&format!("{SUBMISSION_PREFIX}{}", model.name), &model.hash));
    }

    let mut raw = raw_config(dir.path());
    raw["ensemble"]["pred_only"] = json!(true);
    let restored = pipeline(raw)
        .run(table, &events, &ExecutionContext::new())
        .expect("prediction-only run should succeed");
    assert!(restored.models.iter().all(|m| m.summary.is_none()));
    let restored = restored.score.expect("restored run should score").score;
    let trained = trained.score.expect("training run should score").score;
    assert!((restored - trained).abs() < 1e-6);
}

#[test]
fn prediction_scales_new_data_with_the_training_statistics() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut raw = raw_config(dir.path());
    raw["models"] = json!({"lin": {"type": "linear", "epochs": 3, "batch_size": 8, "lr": 0.01}});
    raw["ensemble"] = json!({"models": ["lin"]});
    let pipeline = pipeline(raw);
    let (table, events) = dataset();
    let ctx = ExecutionContext::new();
    pipeline
        .run(table.clone(), &events, &ctx)
        .expect("training run should succeed");

    let stored = load_scaler(pipeline.config(), &pipeline.model_store())
        .expect("the fitted scaler should be stored with the models");
    let processed = pipeline
        .preprocess(table.clone(), &events, &ctx)
        .expect("preprocessing should succeed");
    let fitted = pretrain(
        &processed.table,
        &pipeline.config().pretraining,
        None,
        pipeline.config().seed,
    )
    .expect("pretraining should succeed");
    assert_eq!(stored, fitted.scaler);

    let original = pipeline
        .predict(table, &events, &ctx)
        .expect("prediction should succeed");
    let (shifted, _) = dataset_shifted(1_000.0);
    let moved = pipeline
        .predict(shifted, &events, &ctx)
        .expect("prediction on shifted data should succeed");
    assert_eq!(original.len(), moved.len());
    let largest = original
        .values()
        .iter()
        .zip(moved.values())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    assert!(largest > 1e-3, "shifted inputs must change predictions, got {largest}");
}

#[test]
fn prediction_without_a_stored_scaler_fails() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (table, events) = dataset();
    let err = pipeline(raw_config(dir.path()))
        .predict(table, &events, &ExecutionContext::new())
        .expect_err("nothing was trained into this store");
    assert_eq!(err.category(), ErrorCategory::Io);
}
