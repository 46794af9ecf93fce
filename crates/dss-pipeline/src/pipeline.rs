// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::cache::ArtifactCache;
use crate::config::Configuration;
use crate::executor::{PipelineExecutor, PipelineRun, SeriesFailurePolicy, SkippedSeries, StageReport};
use crate::pretrain::{pretrain, pretrain_with_scaler, prepare_windows};
use crate::registry::{PipelineStage, PreprocessingStage, StageRegistry};
use crate::training::{
    ScoreReport, TrainedModel, load_models, load_scaler, predict_ensemble, save_models,
    save_scaler, score_split, score_stream, train_models,
};
use dss_core::{
    DssError, DssResult, EventTable, ExecutionContext, PredictionStream, SeriesTable, TableStage,
};
use dss_eval::{CvReport, HpoReport, run_cv, run_hpo, split_groups, train_test_split};
use dss_models::{ModelRegistry, ModelStore, TrainSummary};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Prefix of the store names of models retrained on every series.
pub const SUBMISSION_PREFIX: &str = "submission_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub name: String,
    pub hash: String,
    /// `None` when the model was restored instead of trained.
    pub summary: Option<TrainSummary>,
    pub path: Option<PathBuf>,
}

/// Everything one [`Pipeline::run`] produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub config_hash: String,
    pub stages: Vec<StageReport>,
    pub skipped: Vec<SkippedSeries>,
    pub models: Vec<ModelReport>,
    pub score: Option<ScoreReport>,
    pub cv: Option<CvReport>,
    pub hpo: Option<HpoReport>,
    pub submission: Vec<ModelReport>,
    pub elapsed_ms: u64,
}

/// A validated configuration bound to resolved stages, model factories and
/// a shared stage cache.
pub struct Pipeline {
    config: Configuration,
    executor: PipelineExecutor,
    models: ModelRegistry,
    cache: Arc<ArtifactCache>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.executor.stages().len())
            .field("models", &self.config.ensemble.models())
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn window_size(stages: &[PipelineStage]) -> Option<usize> {
    stages.iter().find_map(|stage| match stage {
        PipelineStage::Preprocessing(PreprocessingStage::SplitWindows(split)) => {
            Some(split.window_size)
        }
        _ => None,
    })
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl Pipeline {
    /// Validates `config` and resolves every stage descriptor.
    ///
    /// Fails before any data is touched: unknown stage kinds, bad stage
    /// order, bad model specs and a downsample factor that does not divide
    /// the window size are all configuration errors.
    pub fn new(config: Configuration, stages: &StageRegistry, models: ModelRegistry) -> DssResult<Self> {
        config.validate(&models)?;
        let resolved = stages.resolve_all(&config.preprocessing, &config.feature_engineering)?;
        let size = window_size(&resolved).ok_or_else(|| {
            DssError::config("preprocessing", "a split_windows stage is required")
        })?;
        config
            .pretraining
            .downsample
            .validate_window(size)
            .map_err(|err| err.with_field_prefix("pretraining.downsample"))?;
        Ok(Self {
            config,
            executor: PipelineExecutor::new(resolved),
            models,
            cache: Arc::new(ArtifactCache::new()),
        })
    }

    pub fn with_failure_policy(mut self, policy: SeriesFailurePolicy) -> Self {
        self.executor = self.executor.with_failure_policy(policy);
        self
    }

    /// Shares `cache` with other pipelines over the same data.
    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn model_store(&self) -> ModelStore {
        ModelStore::new(self.config.model_store_loc.clone())
    }

    /// Runs preprocessing and feature stages through the shared cache.
    pub fn preprocess(
        &self,
        table: SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<PipelineRun> {
        self.executor.run(table, events, &self.cache, ctx)
    }

    /// The full flow: preprocess, then either tune, or pretrain, train (or
    /// restore), cross-validate, score and retrain for submission as the
    /// configuration asks.
    pub fn run(
        &self,
        table: SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<RunReport> {
        let started_at = Instant::now();
        let ctx = ctx.with_seed(self.config.seed);
        let config_hash = self.config.fingerprint()?.short();
        info!(config = %config_hash, series = table.len(), "pipeline started");

        let processed = self.preprocess(table, events, &ctx)?;
        let mut report = RunReport {
            config_hash,
            stages: processed.stages.clone(),
            skipped: processed.skipped.clone(),
            models: Vec::new(),
            score: None,
            cv: None,
            hpo: None,
            submission: Vec::new(),
            elapsed_ms: 0,
        };

        if self.config.hpo.apply {
            report.hpo = Some(self.tune_processed(&processed.table, events, &ctx)?);
            report.elapsed_ms = elapsed_ms(started_at);
            return Ok(report);
        }

        let store = self.model_store();
        let (data, trained, paths) = if self.config.ensemble.pred_only() {
            let scaler = load_scaler(&self.config, &store)?;
            let data = pretrain_with_scaler(
                &processed.table,
                &self.config.pretraining,
                None,
                ctx.seed,
                scaler,
            )?;
            let trained = load_models(&self.config, &self.models, &store)?;
            let paths = vec![None; trained.len()];
            (data, trained, paths)
        } else {
            let data = pretrain(&processed.table, &self.config.pretraining, None, ctx.seed)?;
            let trained = train_models(&self.config, &self.models, &data, &ctx)?;
            let paths = save_models(&self.config, &store, &trained, "")?
                .into_iter()
                .map(Some)
                .collect();
            save_scaler(&self.config, &store, &data.scaler, "")?;
            (data, trained, paths)
        };
        report.models = self.model_reports(&trained, paths)?;

        if self.config.cv.apply {
            report.cv = Some(self.cross_validate_processed(&processed.table, events, &ctx)?);
        }

        if self.config.scoring {
            match data.valid.as_ref() {
                Some(valid) => {
                    let stream = predict_ensemble(&self.config, &trained, valid)?;
                    let score = score_stream(&self.config, &stream, valid, events)?;
                    info!(score = score.score, mse = ?score.mse, "validation scored");
                    ctx.record_scalar("score.event_ap", score.score);
                    report.score = Some(score);
                }
                None => warn!("scoring requested but no validation series were held out"),
            }
        }

        if self.config.train_for_submission {
            ctx.check_cancelled()?;
            let full = pretrain(&processed.table, &self.config.pretraining, Some(0.0), ctx.seed)?;
            let retrained = train_models(&self.config, &self.models, &full, &ctx)?;
            let paths = save_models(&self.config, &store, &retrained, SUBMISSION_PREFIX)?;
            save_scaler(&self.config, &store, &full.scaler, SUBMISSION_PREFIX)?;
            report.submission =
                self.model_reports(&retrained, paths.into_iter().map(Some).collect())?;
            info!(models = retrained.len(), "submission models trained");
        }

        report.elapsed_ms = elapsed_ms(started_at);
        info!(elapsed_ms = report.elapsed_ms, "pipeline finished");
        Ok(report)
    }

    /// Ensemble predictions for every series, using the stored models and
    /// the scaler fitted when they were trained.
    pub fn predict(
        &self,
        table: SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<PredictionStream> {
        let ctx = ctx.with_seed(self.config.seed);
        let processed = self.preprocess(table, events, &ctx)?;
        let store = self.model_store();
        let scaler = load_scaler(&self.config, &store)?;
        let trained = load_models(&self.config, &self.models, &store)?;
        let windows = prepare_windows(&self.config.pretraining, &scaler, &processed.table)?;
        let stream = predict_ensemble(&self.config, &trained, &windows)?;
        info!(rows = stream.rows(), windows = windows.len(), "predictions produced");
        Ok(stream)
    }

    fn model_reports(
        &self,
        trained: &[TrainedModel],
        paths: Vec<Option<PathBuf>>,
    ) -> DssResult<Vec<ModelReport>> {
        trained
            .iter()
            .zip(paths)
            .map(|(member, path)| {
                Ok(ModelReport {
                    name: member.name.clone(),
                    hash: self.config.model_hash(&member.name)?,
                    summary: member.summary.clone(),
                    path,
                })
            })
            .collect()
    }

    /// Group k-fold cross-validation of the whole training chain.
    pub fn cross_validate(
        &self,
        table: SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<CvReport> {
        let ctx = ctx.with_seed(self.config.seed);
        let processed = self.preprocess(table, events, &ctx)?;
        self.cross_validate_processed(&processed.table, events, &ctx)
    }

    fn cross_validate_processed(
        &self,
        processed: &SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<CvReport> {
        cross_validate_with(&self.config, &self.models, processed, events, ctx)
    }

    /// Hyperparameter search over `hpo.space`.
    pub fn tune(
        &self,
        table: SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<HpoReport> {
        let ctx = ctx.with_seed(self.config.seed);
        let processed = self.preprocess(table, events, &ctx)?;
        self.tune_processed(&processed.table, events, &ctx)
    }

    fn tune_processed(
        &self,
        processed: &SeriesTable,
        events: &EventTable,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<HpoReport> {
        let holdout = if self.config.cv.apply {
            None
        } else {
            let split = train_test_split(
                &processed.series_ids(),
                self.config.pretraining.test_size,
                self.config.seed,
            )?;
            if split.test.is_empty() {
                return Err(DssError::config(
                    "pretraining.test_size",
                    "hyperparameter search without cv needs a non-empty holdout",
                ));
            }
            Some(split)
        };

        let report = run_hpo(&self.config.hpo, ctx, |candidate, trial_ctx| {
            let config = self.config.with_overrides(candidate)?;
            match &holdout {
                None => cross_validate_with(&config, &self.models, processed, events, trial_ctx)?
                    .mean_score
                    .ok_or_else(|| DssError::training("every cv fold failed")),
                Some(split) => score_split(
                    &config,
                    &self.models,
                    processed,
                    events,
                    &split.train,
                    &split.test,
                    trial_ctx,
                )
                .map(|score| score.score),
            }
        })?;
        info!(
            trials = report.trials.len(),
            best_score = ?report.best_score,
            stop = ?report.stop_reason,
            "hyperparameter search finished"
        );
        Ok(report)
    }

    pub fn stage_kinds(&self) -> Vec<&'static str> {
        self.executor.stages().iter().map(|stage| stage.kind()).collect()
    }
}

fn cross_validate_with(
    config: &Configuration,
    models: &ModelRegistry,
    processed: &SeriesTable,
    events: &EventTable,
    ctx: &ExecutionContext<'_>,
) -> DssResult<CvReport> {
    let folds = split_groups(&processed.series_ids(), &config.cv.method, config.seed)?;
    let report = run_cv(folds, ctx, |fold, fold_ctx| {
        score_split(
            config,
            models,
            processed,
            events,
            &fold.train,
            &fold.test,
            fold_ctx,
        )
        .map(|score| score.score)
    })?;
    info!(
        folds = report.folds.len(),
        completed = report.completed,
        mean_score = ?report.mean_score,
        "cross-validation finished"
    );
    Ok(report)
}
