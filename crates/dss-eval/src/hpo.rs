// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::cv::FoldOutcome;
use dss_core::{
    Budget, BudgetMode, BudgetStatus, DssError, DssResult, ErrorCategory, ExecutionContext,
    derive_seed,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// One hyperparameter assignment keyed by `"<model>.<param>"`.
pub type Candidate = BTreeMap<String, Value>;

/// Trial outcomes share the fold outcome shape.
pub type TrialOutcome = FoldOutcome;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ParamDistribution {
    Choice { values: Vec<Value> },
    Uniform { low: f64, high: f64 },
    LogUniform { low: f64, high: f64 },
    /// Inclusive on both ends.
    Int { low: i64, high: i64 },
}

impl ParamDistribution {
    fn validate(&self, field: &str) -> DssResult<()> {
        let problem = match self {
            Self::Choice { values } if values.is_empty() => {
                Some("choice needs at least one value".to_string())
            }
            Self::Uniform { low, high } if !(low.is_finite() && high.is_finite() && low < high) => {
                Some(format!("uniform needs finite low < high, got [{low}, {high}]"))
            }
            Self::LogUniform { low, high }
                if !(low.is_finite() && high.is_finite() && *low > 0.0 && low < high) =>
            {
                Some(format!("log_uniform needs 0 < low < high, got [{low}, {high}]"))
            }
            Self::Int { low, high } if low > high => {
                Some(format!("int needs low <= high, got [{low}, {high}]"))
            }
            _ => None,
        };
        match problem {
            Some(message) => Err(DssError::config(field, message)),
            None => Ok(()),
        }
    }

    fn sample(&self, rng: &mut StdRng) -> Value {
        match self {
            Self::Choice { values } => values.choose(rng).cloned().unwrap_or(Value::Null),
            Self::Uniform { low, high } => Value::from(rng.gen_range(*low..*high)),
            Self::LogUniform { low, high } => {
                Value::from(rng.gen_range(low.ln()..high.ln()).exp())
            }
            Self::Int { low, high } => Value::from(rng.gen_range(*low..=*high)),
        }
    }

    fn grid_values(&self, field: &str) -> DssResult<Vec<Value>> {
        match self {
            Self::Choice { values } => Ok(values.clone()),
            Self::Int { low, high } => Ok((*low..=*high).map(Value::from).collect()),
            Self::Uniform { .. } | Self::LogUniform { .. } => Err(DssError::config(
                field,
                "grid search needs choice or int distributions",
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum HpoMethod {
    Random { n_trials: usize },
    Grid,
}

impl Default for HpoMethod {
    fn default() -> Self {
        Self::Random { n_trials: 10 }
    }
}

fn default_parallel_trials() -> usize {
    4
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HpoSpec {
    #[serde(default)]
    pub apply: bool,
    #[serde(default)]
    pub method: HpoMethod,
    #[serde(default)]
    pub max_trials: Option<usize>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Overrides the context's budget mode when set.
    #[serde(default)]
    pub budget_mode: Option<BudgetMode>,
    #[serde(default)]
    pub space: BTreeMap<String, ParamDistribution>,
    #[serde(default = "default_parallel_trials")]
    pub parallel_trials: usize,
}

impl Default for HpoSpec {
    fn default() -> Self {
        Self {
            apply: false,
            method: HpoMethod::default(),
            max_trials: None,
            time_budget_ms: None,
            budget_mode: None,
            space: BTreeMap::new(),
            parallel_trials: default_parallel_trials(),
        }
    }
}

/// Splits a search-space key into `(model, param)`.
pub fn split_param_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('.')
        .filter(|(model, param)| !model.is_empty() && !param.is_empty())
}

impl HpoSpec {
    pub fn validate(&self) -> DssResult<()> {
        if let HpoMethod::Random { n_trials: 0 } = self.method {
            return Err(DssError::config("hpo.method.n_trials", "must be >= 1"));
        }
        if self.parallel_trials == 0 {
            return Err(DssError::config("hpo.parallel_trials", "must be >= 1"));
        }
        if self.max_trials == Some(0) {
            return Err(DssError::config("hpo.max_trials", "must be >= 1"));
        }
        if self.space.is_empty() {
            return Err(DssError::config("hpo.space", "must declare at least one parameter"));
        }
        for (key, distribution) in &self.space {
            let field = format!("hpo.space.{key}");
            if split_param_key(key).is_none() {
                return Err(DssError::config(
                    field,
                    "parameter keys must look like '<model>.<param>'",
                ));
            }
            distribution.validate(&field)?;
        }
        Ok(())
    }

    /// Candidate list; a pure function of `(self, seed)`.
    pub fn candidates(&self, seed: u64) -> DssResult<Vec<Candidate>> {
        self.validate()?;
        match self.method {
            HpoMethod::Random { n_trials } => Ok((0..n_trials)
                .map(|trial| {
                    let mut rng = StdRng::seed_from_u64(derive_seed(seed, "hpo", trial as u64));
                    self.space
                        .iter()
                        .map(|(key, distribution)| (key.clone(), distribution.sample(&mut rng)))
                        .collect()
                })
                .collect()),
            HpoMethod::Grid => {
                let mut grid = vec![Candidate::new()];
                for (key, distribution) in &self.space {
                    let values = distribution.grid_values(&format!("hpo.space.{key}"))?;
                    grid = grid
                        .into_iter()
                        .flat_map(|partial| {
                            values.iter().map(move |value| {
                                let mut next = partial.clone();
                                next.insert(key.clone(), value.clone());
                                next
                            })
                        })
                        .collect();
                }
                Ok(grid)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    TrialBudget,
    TimeBudget,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: usize,
    pub params: Candidate,
    pub outcome: TrialOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HpoReport {
    pub trials: Vec<TrialRecord>,
    /// Highest-scoring completed trial; ties keep the earlier trial.
    pub best_params: Option<Candidate>,
    pub best_score: Option<f64>,
    pub stop_reason: StopReason,
    pub elapsed_ms: u64,
}

/// Runs the search in parallel batches of `parallel_trials`, maximizing
/// the objective.
///
/// The cancel token, trial budget and time budget are checked before each
/// batch. Under `SoftDegrade` an exhausted budget or a cancellation ends
/// the search and keeps every completed trial; under `HardFail` an
/// exhausted budget is an error.
pub fn run_hpo<F>(spec: &HpoSpec, ctx: &ExecutionContext<'_>, objective: F) -> DssResult<HpoReport>
where
    F: Fn(&Candidate, &ExecutionContext<'_>) -> DssResult<f64> + Sync,
{
    let candidates = spec.candidates(ctx.seed)?;
    let budget = Budget {
        max_trials: spec.max_trials.or(ctx.budget.max_trials),
        time_budget_ms: spec.time_budget_ms.or(ctx.budget.time_budget_ms),
    };
    let ctx = ctx
        .with_budget(budget)
        .with_budget_mode(spec.budget_mode.unwrap_or(ctx.budget_mode));
    let started_at = Instant::now();
    let total = match budget.max_trials {
        Some(limit) => candidates.len().min(limit),
        None => candidates.len(),
    };

    let mut trials: Vec<TrialRecord> = Vec::new();
    let mut next = 0;
    let stop_reason = loop {
        if next >= candidates.len() {
            break StopReason::Exhausted;
        }
        if ctx.is_cancelled() {
            break StopReason::Cancelled;
        }
        if ctx.check_trial_budget(next)? == BudgetStatus::ExceededSoftDegrade {
            break StopReason::TrialBudget;
        }
        if ctx.check_time_budget(started_at)? == BudgetStatus::ExceededSoftDegrade {
            break StopReason::TimeBudget;
        }

        let mut end = (next + spec.parallel_trials).min(candidates.len());
        if let Some(limit) = budget.max_trials {
            end = end.min(limit);
        }
        let results: Vec<DssResult<f64>> = candidates[next..end]
            .par_iter()
            .enumerate()
            .map(|(offset, candidate)| {
                let seed = derive_seed(ctx.seed, "hpo-trial", (next + offset) as u64);
                let trial_ctx = ctx.with_seed(seed);
                objective(candidate, &trial_ctx)
            })
            .collect();

        let mut cancelled = false;
        for (offset, result) in results.into_iter().enumerate() {
            let index = next + offset;
            let outcome = match result {
                Ok(score) if score.is_finite() => {
                    ctx.record_scalar("hpo.trial_score", score);
                    info!(trial = index, score, "hpo trial completed");
                    TrialOutcome::Completed { score }
                }
                Ok(score) => TrialOutcome::Failed {
                    category: ErrorCategory::Training,
                    origin: None,
                    message: format!("trial score is {score}"),
                },
                Err(DssError::Cancelled) => {
                    cancelled = true;
                    continue;
                }
                Err(err) => {
                    warn!(trial = index, error = %err, "hpo trial failed");
                    TrialOutcome::from_error(&err)
                }
            };
            trials.push(TrialRecord {
                index,
                params: candidates[index].clone(),
                outcome,
            });
        }
        next = end;
        ctx.report_progress(next as f32 / total.max(1) as f32);
        if cancelled {
            break StopReason::Cancelled;
        }
    };

    let best = trials
        .iter()
        .filter_map(|trial| trial.outcome.score().map(|score| (trial, score)))
        .fold(None::<(&TrialRecord, f64)>, |best, (trial, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((trial, score)),
        });
    if let Some((trial, score)) = best {
        ctx.record_scalar("hpo.best_score", score);
        info!(trial = trial.index, score, stop = ?stop_reason, "hpo finished");
    } else {
        warn!(stop = ?stop_reason, "hpo finished without a completed trial");
    }

    Ok(HpoReport {
        best_params: best.map(|(trial, _)| trial.params.clone()),
        best_score: best.map(|(_, score)| score),
        trials,
        stop_reason,
        elapsed_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::{Candidate, HpoMethod, HpoSpec, ParamDistribution, StopReason, run_hpo};
    use dss_core::{BudgetMode, CancelToken, DssError, DssResult, ExecutionContext};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn grid_spec(values: &[i64]) -> HpoSpec {
        HpoSpec {
            apply: true,
            method: HpoMethod::Grid,
            space: BTreeMap::from([(
                "lin.lr".to_string(),
                ParamDistribution::Choice {
                    values: values.iter().map(|v| json!(v)).collect(),
                },
            )]),
            parallel_trials: 1,
            ..HpoSpec::default()
        }
    }

    fn value_of(candidate: &Candidate) -> f64 {
        candidate["lin.lr"].as_f64().expect("candidate value should be numeric")
    }

    #[test]
    fn random_candidates_are_seeded_and_in_range() {
        let spec: HpoSpec = serde_json::from_value(json!({
            "apply": true,
            "method": {"kind": "random", "n_trials": 8},
            "space": {
                "lin.lr": {"type": "log_uniform", "low": 1e-4, "high": 1e-1},
                "lin.batch_size": {"type": "int", "low": 8, "high": 64},
                "lin.loss": {"type": "choice", "values": ["mse", "bce"]}
            }
        }))
        .expect("hpo spec should parse");
        let a = spec.candidates(42).expect("candidates should generate");
        assert_eq!(a, spec.candidates(42).expect("candidates should generate"));
        assert_ne!(a, spec.candidates(43).expect("candidates should generate"));
        for candidate in &a {
            let lr = candidate["lin.lr"].as_f64().expect("lr should be a float");
            assert!((1e-4..1e-1).contains(&lr));
            let batch = candidate["lin.batch_size"].as_i64().expect("batch should be an int");
            assert!((8..=64).contains(&batch));
            assert!(matches!(&candidate["lin.loss"], Value::String(_)));
        }
    }

    #[test]
    fn grid_is_the_cartesian_product() {
        let mut spec = grid_spec(&[1, 2, 3]);
        spec.space.insert(
            "lin.epochs".into(),
            ParamDistribution::Int { low: 1, high: 2 },
        );
        assert_eq!(spec.candidates(0).expect("grid should expand").len(), 6);

        spec.space.insert(
            "lin.threshold".into(),
            ParamDistribution::Uniform { low: 0.0, high: 1.0 },
        );
        let err = spec.candidates(0).expect_err("continuous grid should fail");
        assert!(err.to_string().contains("hpo.space.lin.threshold"));
    }

    #[test]
    fn keys_must_name_a_model_parameter() {
        let mut spec = grid_spec(&[1]);
        spec.space.insert(
            "lr".into(),
            ParamDistribution::Int { low: 1, high: 2 },
        );
        let err = spec.validate().expect_err("bare key should fail");
        assert!(err.to_string().contains("hpo.space.lr"));
    }

    #[test]
    fn best_trial_wins_and_failures_are_recorded() {
        let spec = HpoSpec {
            parallel_trials: 2,
            ..grid_spec(&[3, 1, 4, 2])
        };
        let objective = |c: &Candidate, _: &ExecutionContext<'_>| {
            let v = value_of(c);
            if v == 1.0 {
                Err(DssError::training("diverged"))
            } else {
                Ok(v)
            }
        };
        let report =
            run_hpo(&spec, &ExecutionContext::new(), objective).expect("search should complete");
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.trials.len(), 4);
        assert_eq!(report.best_score, Some(4.0));
        assert_eq!(report.best_params.as_ref().map(value_of), Some(4.0));
        assert!(report.trials[1].outcome.score().is_none());
    }

    #[test]
    fn trial_budget_soft_degrades_or_fails_hard() {
        let mut spec = grid_spec(&[1, 2, 3, 4, 5]);
        spec.max_trials = Some(3);
        let objective =
            |c: &Candidate, _: &ExecutionContext<'_>| -> DssResult<f64> { Ok(value_of(c)) };

        let report = run_hpo(&spec, &ExecutionContext::new(), objective)
            .expect("soft mode should keep partial results");
        assert_eq!(report.stop_reason, StopReason::TrialBudget);
        assert_eq!(report.trials.len(), 3);
        assert_eq!(report.best_score, Some(3.0));

        spec.budget_mode = Some(BudgetMode::HardFail);
        let err = run_hpo(&spec, &ExecutionContext::new(), objective)
            .expect_err("hard mode should fail");
        assert!(err.to_string().contains("hpo.max_trials"));
    }

    #[test]
    fn time_budget_soft_degrades_or_fails_hard() {
        let mut spec = grid_spec(&[1, 2, 3, 4]);
        spec.time_budget_ms = Some(5);
        let objective = |c: &Candidate, _: &ExecutionContext<'_>| -> DssResult<f64> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(value_of(c))
        };

        let report = run_hpo(&spec, &ExecutionContext::new(), objective)
            .expect("soft mode should keep partial results");
        assert_eq!(report.stop_reason, StopReason::TimeBudget);
        assert_eq!(report.trials.len(), 1);
        assert_eq!(report.best_score, Some(1.0));
        assert_eq!(report.best_params.as_ref().map(value_of), Some(1.0));
        assert!(report.elapsed_ms >= 20);

        spec.budget_mode = Some(BudgetMode::HardFail);
        let err = run_hpo(&spec, &ExecutionContext::new(), objective)
            .expect_err("hard mode should fail once the time budget is spent");
        assert!(matches!(err, DssError::Config { ref field, .. } if field == "hpo.time_budget_ms"));
    }

    #[test]
    fn cancellation_keeps_completed_trials() {
        let cancel = CancelToken::new();
        let ctx = ExecutionContext::new().with_cancel(&cancel);
        let objective = |c: &Candidate, _: &ExecutionContext<'_>| -> DssResult<f64> {
            let v = value_of(c);
            if v == 2.0 {
                cancel.cancel();
            }
            Ok(v)
        };
        let report = run_hpo(&grid_spec(&[1, 2, 3, 4]), &ctx, objective)
            .expect("cancelled search should keep partial results");
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.trials.len(), 2);
        assert_eq!(report.best_score, Some(2.0));
    }
}
