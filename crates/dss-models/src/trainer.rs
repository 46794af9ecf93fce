// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::TrainSummary;
use crate::spec::ModelSpec;
use dss_core::{DssError, DssResult, ExecutionContext};
use tracing::{debug, info};

/// One trainable parameter set driven epoch by epoch.
pub trait EpochLearner {
    type Snapshot;

    /// Runs one pass over the training rows and returns the mean training loss.
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> DssResult<f64>;

    /// Mean loss on the validation rows, if there are any.
    fn validation_loss(&self) -> DssResult<Option<f64>>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);
}

/// Epoch loop with best-snapshot restore and optional early stopping.
#[derive(Clone, Debug)]
pub struct EpochTrainer {
    label: String,
    spec: ModelSpec,
}

impl EpochTrainer {
    /// `label` prefixes metric keys, e.g. `linear.train_loss`.
    pub fn new(label: impl Into<String>, spec: &ModelSpec) -> Self {
        Self {
            label: label.into(),
            spec: spec.clone(),
        }
    }

    pub fn run<L: EpochLearner>(
        &self,
        learner: &mut L,
        ctx: &ExecutionContext<'_>,
    ) -> DssResult<TrainSummary> {
        let epochs = self.spec.epochs;
        let patience = self.spec.early_stopping;
        let mut summary = TrainSummary::default();
        let mut best: Option<(usize, f64, L::Snapshot)> = None;
        let mut stale = 0usize;

        for epoch in 0..epochs {
            ctx.check_cancelled()?;
            let lr = self.spec.learning_rate(epoch);
            let train_loss = learner.train_epoch(epoch, lr)?;
            ensure_finite(train_loss, "training", epoch)?;
            let valid_loss = learner.validation_loss()?;
            if let Some(loss) = valid_loss {
                ensure_finite(loss, "validation", epoch)?;
                summary.valid_losses.push(loss);
                ctx.record_scalar(&format!("{}.valid_loss", self.label), loss);
            }
            summary.train_losses.push(train_loss);
            summary.epochs_run = epoch + 1;
            ctx.record_scalar(&format!("{}.train_loss", self.label), train_loss);
            ctx.record_scalar(&format!("{}.lr", self.label), lr);
            debug!(
                model = %self.label,
                epoch,
                lr,
                train_loss,
                valid_loss = ?valid_loss,
                "epoch finished"
            );

            let monitored = valid_loss.unwrap_or(train_loss);
            if best.as_ref().is_none_or(|(_, loss, _)| monitored < *loss) {
                best = Some((epoch, monitored, learner.snapshot()));
                stale = 0;
            } else {
                stale += 1;
                if patience > 0 && stale >= patience {
                    summary.stopped_early = true;
                    info!(
                        model = %self.label,
                        epoch,
                        patience,
                        "early stopping: no improvement"
                    );
                    break;
                }
            }
            ctx.report_progress((epoch + 1) as f32 / epochs as f32);
        }

        if let Some((epoch, loss, snapshot)) = best {
            learner.restore(snapshot);
            summary.best_epoch = epoch;
            summary.best_loss = loss;
        }
        Ok(summary)
    }
}

fn ensure_finite(loss: f64, which: &str, epoch: usize) -> DssResult<()> {
    if loss.is_finite() {
        return Ok(());
    }
    Err(DssError::training(format!(
        "{which} loss is {loss} at epoch {epoch}"
    )))
}

#[cfg(test)]
mod tests {
    use super::{EpochLearner, EpochTrainer};
    use crate::spec::ModelSpec;
    use dss_core::{CancelToken, DssError, DssResult, ExecutionContext, MemoryMetricsSink};

    /// Replays a fixed validation-loss curve; the snapshot is the epoch index.
    struct Scripted {
        valid: Vec<f64>,
        epoch: usize,
        restored: Option<usize>,
    }

    impl Scripted {
        fn new(valid: Vec<f64>) -> Self {
            Self {
                valid,
                epoch: 0,
                restored: None,
            }
        }
    }

    impl EpochLearner for Scripted {
        type Snapshot = usize;

        fn train_epoch(&mut self, epoch: usize, _lr: f64) -> DssResult<f64> {
            self.epoch = epoch;
            Ok(1.0)
        }

        fn validation_loss(&self) -> DssResult<Option<f64>> {
            Ok(Some(self.valid[self.epoch]))
        }

        fn snapshot(&self) -> usize {
            self.epoch
        }

        fn restore(&mut self, snapshot: usize) {
            self.restored = Some(snapshot);
        }
    }

    fn spec(epochs: usize, early_stopping: usize) -> ModelSpec {
        let mut spec = ModelSpec::new("scripted");
        spec.epochs = epochs;
        spec.early_stopping = early_stopping;
        spec
    }

    #[test]
    fn early_stopping_restores_best_epoch() {
        let mut learner = Scripted::new(vec![3.0, 2.0, 2.5, 2.4, 1.0]);
        let summary = EpochTrainer::new("m", &spec(5, 2))
            .run(&mut learner, &ExecutionContext::new())
            .expect("training should succeed");
        assert!(summary.stopped_early);
        assert_eq!(summary.epochs_run, 4);
        assert_eq!(summary.best_epoch, 1);
        assert_eq!(summary.best_loss, 2.0);
        assert_eq!(learner.restored, Some(1));
    }

    #[test]
    fn disabled_early_stopping_runs_every_epoch() {
        let mut learner = Scripted::new(vec![3.0, 4.0, 5.0, 6.0]);
        let summary = EpochTrainer::new("m", &spec(4, 0))
            .run(&mut learner, &ExecutionContext::new())
            .expect("training should succeed");
        assert!(!summary.stopped_early);
        assert_eq!(summary.epochs_run, 4);
        assert_eq!(learner.restored, Some(0));
    }

    #[test]
    fn non_finite_loss_is_a_training_error() {
        let mut learner = Scripted::new(vec![1.0, f64::NAN]);
        let err = EpochTrainer::new("m", &spec(2, 0))
            .run(&mut learner, &ExecutionContext::new())
            .expect_err("NaN loss should fail");
        assert!(matches!(err, DssError::Training(_)));
        assert!(err.to_string().contains("epoch 1"));
    }

    #[test]
    fn cancellation_is_checked_between_epochs() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = ExecutionContext::new().with_cancel(&cancel);
        let mut learner = Scripted::new(vec![1.0]);
        let err = EpochTrainer::new("m", &spec(1, 0))
            .run(&mut learner, &ctx)
            .expect_err("cancelled run should fail");
        assert!(matches!(err, DssError::Cancelled));
    }

    #[test]
    fn per_epoch_metrics_reach_the_sink() {
        let sink = MemoryMetricsSink::new();
        let ctx = ExecutionContext::new().with_metrics_sink(&sink);
        let mut learner = Scripted::new(vec![2.0, 1.0]);
        EpochTrainer::new("gru", &spec(2, 0))
            .run(&mut learner, &ctx)
            .expect("training should succeed");
        assert_eq!(sink.values_for("gru.valid_loss"), vec![2.0, 1.0]);
        assert_eq!(sink.values_for("gru.train_loss").len(), 2);
    }
}
