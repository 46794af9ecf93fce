// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, ErrorCategory, ExecutionContext, derive_seed};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Series-grouped splitting strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CvMethod {
    /// Every series lands in exactly one test fold.
    GroupKFold { n_splits: usize },
    /// Independent random splits; a series may be tested in several splits.
    GroupShuffle { n_splits: usize, test_size: f64 },
}

impl Default for CvMethod {
    fn default() -> Self {
        Self::GroupKFold { n_splits: 5 }
    }
}

impl CvMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupKFold { .. } => "group_k_fold",
            Self::GroupShuffle { .. } => "group_shuffle",
        }
    }

    pub fn n_splits(&self) -> usize {
        match self {
            Self::GroupKFold { n_splits } | Self::GroupShuffle { n_splits, .. } => *n_splits,
        }
    }

    pub fn validate(&self) -> DssResult<()> {
        match self {
            Self::GroupKFold { n_splits } if *n_splits < 2 => Err(DssError::config(
                "cv.method.n_splits",
                format!("group_k_fold needs at least 2 splits, got {n_splits}"),
            )),
            Self::GroupShuffle { n_splits, .. } if *n_splits == 0 => Err(DssError::config(
                "cv.method.n_splits",
                "must be >= 1",
            )),
            Self::GroupShuffle { test_size, .. }
                if !(test_size.is_finite() && *test_size > 0.0 && *test_size < 1.0) =>
            {
                Err(DssError::config(
                    "cv.method.test_size",
                    format!("must be in (0, 1), got {test_size}"),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CvSpec {
    #[serde(default)]
    pub apply: bool,
    #[serde(default)]
    pub method: CvMethod,
}

/// One train/test partition of series ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<String>,
    pub test: Vec<String>,
}

fn test_count(total: usize, test_size: f64) -> usize {
    let raw = (test_size * total as f64).ceil() as usize;
    raw.clamp(1, total - 1)
}

fn shuffled(ids: &[String], seed: u64, stream: &str, index: u64) -> Vec<String> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    let mut rng = StdRng::seed_from_u64(derive_seed(seed, stream, index));
    ids.shuffle(&mut rng);
    ids
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

/// Splits series ids into folds; the result is a pure function of
/// `(ids, method, seed)`.
pub fn split_groups(ids: &[String], method: &CvMethod, seed: u64) -> DssResult<Vec<Fold>> {
    method.validate()?;
    let distinct = shuffled(ids, seed, "cv", 0).len();
    let needed = match method {
        CvMethod::GroupKFold { n_splits } => *n_splits,
        CvMethod::GroupShuffle { .. } => 2,
    };
    if distinct < needed {
        return Err(DssError::data(format!(
            "{} needs at least {needed} series, got {distinct}",
            method.as_str()
        )));
    }

    let folds = match method {
        CvMethod::GroupKFold { n_splits } => {
            let order = shuffled(ids, seed, "cv", 0);
            (0..*n_splits)
                .map(|fold| {
                    let (test, train): (Vec<_>, Vec<_>) = order
                        .iter()
                        .enumerate()
                        .partition(|(pos, _)| pos % n_splits == fold);
                    Fold {
                        index: fold,
                        train: sorted(train.into_iter().map(|(_, id)| id.clone()).collect()),
                        test: sorted(test.into_iter().map(|(_, id)| id.clone()).collect()),
                    }
                })
                .collect()
        }
        CvMethod::GroupShuffle {
            n_splits,
            test_size,
        } => (0..*n_splits)
            .map(|fold| {
                let mut order = shuffled(ids, seed, "cv", fold as u64);
                let train = order.split_off(test_count(order.len(), *test_size));
                Fold {
                    index: fold,
                    train: sorted(train),
                    test: sorted(order),
                }
            })
            .collect(),
    };
    Ok(folds)
}

/// Single seeded group split used for pretraining train/validation data.
pub fn train_test_split(ids: &[String], test_size: f64, seed: u64) -> DssResult<Fold> {
    if !(test_size.is_finite() && (0.0..1.0).contains(&test_size)) {
        return Err(DssError::config(
            "pretraining.test_size",
            format!("must be in [0, 1), got {test_size}"),
        ));
    }
    let mut order = shuffled(ids, seed, "pretraining-split", 0);
    if test_size == 0.0 || order.len() < 2 {
        return Ok(Fold {
            index: 0,
            train: sorted(order),
            test: vec![],
        });
    }
    let train = order.split_off(test_count(order.len(), test_size));
    Ok(Fold {
        index: 0,
        train: sorted(train),
        test: sorted(order),
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FoldOutcome {
    Completed {
        score: f64,
    },
    Failed {
        category: ErrorCategory,
        origin: Option<String>,
        message: String,
    },
}

impl FoldOutcome {
    pub fn from_error(err: &DssError) -> Self {
        Self::Failed {
            category: err.category(),
            origin: err.origin(),
            message: err.to_string(),
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Completed { score } => Some(*score),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: Fold,
    pub outcome: FoldOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub folds: Vec<FoldReport>,
    /// Mean over completed folds; `None` when every fold failed.
    pub mean_score: Option<f64>,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl CvReport {
    pub fn scores(&self) -> Vec<f64> {
        self.folds
            .iter()
            .filter_map(|report| report.outcome.score())
            .collect()
    }
}

/// Scores every fold in parallel.
///
/// A fold whose `score_fn` errors is recorded as failed and excluded from
/// the mean. Cancellation is the one error that aborts the whole run.
pub fn run_cv<F>(folds: Vec<Fold>, ctx: &ExecutionContext<'_>, score_fn: F) -> DssResult<CvReport>
where
    F: Fn(&Fold, &ExecutionContext<'_>) -> DssResult<f64> + Sync,
{
    ctx.check_cancelled()?;
    let started_at = Instant::now();
    let total = folds.len();
    let outcomes: Vec<DssResult<f64>> = folds
        .par_iter()
        .map(|fold| {
            ctx.check_cancelled()?;
            let fold_ctx = ctx.with_seed(derive_seed(ctx.seed, "cv-fold", fold.index as u64));
            score_fn(fold, &fold_ctx)
        })
        .collect();

    let mut reports = Vec::with_capacity(total);
    for (fold, outcome) in folds.into_iter().zip(outcomes) {
        let outcome = match outcome {
            Ok(score) if score.is_finite() => {
                ctx.record_scalar("cv.fold_score", score);
                info!(fold = fold.index, score, "cv fold completed");
                FoldOutcome::Completed { score }
            }
            Ok(score) => FoldOutcome::Failed {
                category: ErrorCategory::Training,
                origin: None,
                message: format!("fold score is {score}"),
            },
            Err(DssError::Cancelled) => return Err(DssError::cancelled()),
            Err(err) => {
                warn!(fold = fold.index, error = %err, "cv fold failed");
                FoldOutcome::from_error(&err)
            }
        };
        reports.push(FoldReport { fold, outcome });
    }
    ctx.report_progress(1.0);

    let scores: Vec<f64> = reports
        .iter()
        .filter_map(|report| report.outcome.score())
        .collect();
    let mean_score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);
    if let Some(mean) = mean_score {
        ctx.record_scalar("cv.mean_score", mean);
    }
    Ok(CvReport {
        completed: scores.len(),
        failed: total - scores.len(),
        folds: reports,
        mean_score,
        elapsed_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
