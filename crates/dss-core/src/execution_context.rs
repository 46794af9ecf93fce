// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::DssError;
use crate::control::{Budget, BudgetMode, BudgetStatus, CancelToken};
use crate::observability::{MetricsSink, ProgressSink};
use crate::repro::DEFAULT_SEED;
use std::time::Instant;

/// Unified execution context passed through pipeline, training and search calls.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub budget: Budget,
    pub cancel: Option<&'a CancelToken>,
    pub budget_mode: BudgetMode,
    pub seed: u64,
    pub progress: Option<&'a dyn ProgressSink>,
    pub metrics: Option<&'a dyn MetricsSink>,
}

impl Default for ExecutionContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with an unlimited budget and no optional hooks.
    pub fn new() -> Self {
        Self {
            budget: Budget::unlimited(),
            cancel: None,
            budget_mode: BudgetMode::SoftDegrade,
            seed: DEFAULT_SEED,
            progress: None,
            metrics: None,
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_budget_mode(mut self, budget_mode: BudgetMode) -> Self {
        self.budget_mode = budget_mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_metrics_sink(mut self, metrics: &'a dyn MetricsSink) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    pub fn check_cancelled(&self) -> Result<(), DssError> {
        if self.is_cancelled() {
            return Err(DssError::cancelled());
        }
        Ok(())
    }

    /// Checks how many trials have been started against `budget.max_trials`.
    pub fn check_trial_budget(&self, trials: usize) -> Result<BudgetStatus, DssError> {
        let Some(limit) = self.budget.max_trials else {
            return Ok(BudgetStatus::WithinBudget);
        };

        if trials < limit {
            return Ok(BudgetStatus::WithinBudget);
        }

        match self.budget_mode {
            BudgetMode::HardFail => Err(DssError::config(
                "hpo.max_trials",
                format!("budget exceeded: trials={trials}, limit={limit}, budget_mode=HardFail"),
            )),
            BudgetMode::SoftDegrade => Ok(BudgetStatus::ExceededSoftDegrade),
        }
    }

    /// Same as [`check_trial_budget`](Self::check_trial_budget) for wall-clock
    /// time since `started_at`.
    pub fn check_time_budget(&self, started_at: Instant) -> Result<BudgetStatus, DssError> {
        let Some(limit_ms) = self.budget.time_budget_ms else {
            return Ok(BudgetStatus::WithinBudget);
        };

        let elapsed_ms = started_at.elapsed().as_millis();
        if elapsed_ms <= u128::from(limit_ms) {
            return Ok(BudgetStatus::WithinBudget);
        }

        match self.budget_mode {
            BudgetMode::HardFail => Err(DssError::config(
                "hpo.time_budget_ms",
                format!(
                    "budget exceeded: elapsed_ms={elapsed_ms}, limit_ms={limit_ms}, budget_mode=HardFail"
                ),
            )),
            BudgetMode::SoftDegrade => Ok(BudgetStatus::ExceededSoftDegrade),
        }
    }

    /// Forwards a completion fraction in `[0, 1]`; NaN and infinities are dropped.
    pub fn report_progress(&self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }

        if let Some(sink) = self.progress {
            sink.on_progress(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn record_scalar(&self, key: &str, value: f64) {
        if let Some(sink) = self.metrics {
            sink.record_scalar(key, value);
        }
    }
}
