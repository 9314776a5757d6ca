//! Trains and scores one sampled configuration.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use sl_monitor::{dispatch, Notifier, SweepAlert, SweepAlertKind};
use sl_optimizer::score;
use sl_types::{
    Configuration, Dataset, EvaluationError, PruneReason, SweepError, TrainingError,
    TrialMetrics, TrialOutcome,
};

use crate::metrics::classification_report;
use crate::trainer::{FitRequest, Trainer};

/// Runs a single trial: filter, fit, evaluate, score.
pub struct TrialExecutor {
    trainer: Arc<dyn Trainer>,
    notifier: Arc<dyn Notifier>,
}

impl TrialExecutor {
    pub fn new(trainer: Arc<dyn Trainer>, notifier: Arc<dyn Notifier>) -> Self {
        Self { trainer, notifier }
    }

    /// Execute `config` against `train`, validating on the rows of `val`
    /// whose label the training set contains.
    ///
    /// A trainer failure notifies the operator once and prunes the trial.
    /// An empty filtered validation set, or metrics that cannot be computed,
    /// fail it.
    pub async fn execute(
        &self,
        trial_index: u64,
        config: &Configuration,
        train: &Dataset,
        val: &Dataset,
    ) -> TrialOutcome {
        let filtered = val.restrict_to_labels(&train.label_set());
        if filtered.is_empty() {
            return TrialOutcome::Failed(EvaluationError::EmptyValidationSet.into());
        }
        if filtered.len() < val.len() {
            debug!(
                "Trial {}: dropped {} validation rows with unseen labels",
                trial_index,
                val.len() - filtered.len()
            );
        }

        let start = Instant::now();
        let fit = self
            .trainer
            .fit(FitRequest {
                config,
                train,
                eval: &filtered,
                use_best_model: true,
            })
            .await
            .and_then(|fit| fit.check_shape(filtered.len()).map(|_| fit));

        let fit = match fit {
            Ok(fit) => fit,
            Err(e) => return self.prune_failed(trial_index, config, e).await,
        };

        let report = match classification_report(filtered.labels(), &fit.probabilities, &fit.classes) {
            Ok(report) => report,
            Err(e) => return TrialOutcome::Failed(SweepError::Evaluation(e)),
        };
        let duration_seconds = start.elapsed().as_secs_f64();
        let score = score(
            report.accuracy,
            report.f1,
            report.log_loss,
            duration_seconds,
            fit.iterations,
        );

        TrialOutcome::Completed(TrialMetrics {
            accuracy: report.accuracy,
            f1: report.f1,
            log_loss: report.log_loss,
            duration_seconds,
            iterations: fit.iterations,
            score,
        })
    }

    async fn prune_failed(
        &self,
        trial_index: u64,
        config: &Configuration,
        error: TrainingError,
    ) -> TrialOutcome {
        let message = error.to_string();
        warn!("Trial {} training failed: {}", trial_index, message);
        let alert = SweepAlert::new(SweepAlertKind::TrialFailed {
            trial_index,
            depth: config.depth,
            iterations: config.iterations,
            l2_leaf_reg: config.l2_leaf_reg,
            error: message.clone(),
        });
        dispatch(self.notifier.as_ref(), &alert).await;
        TrialOutcome::Pruned(PruneReason::TrainingFailed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{datasets, FakeTrainer, RecordingNotifier};
    use sl_types::FixedParams;

    fn config() -> Configuration {
        Configuration::new(400, 6, 0.1, 1.0, 1.0, &FixedParams::default())
    }

    #[tokio::test]
    async fn completed_trial_is_scored_on_filtered_labels() {
        let (train, val) = datasets();
        let trainer = Arc::new(FakeTrainer::ok());
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = TrialExecutor::new(trainer.clone(), notifier.clone());

        let outcome = executor.execute(0, &config(), &train, &val).await;
        let metrics = match outcome {
            TrialOutcome::Completed(m) => m,
            other => panic!("expected completion, got {other:?}"),
        };
        // Label 9 never reaches the trainer.
        assert_eq!(*trainer.eval_sizes.lock().unwrap(), vec![4]);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.iterations, 200);
        let expected = score(
            metrics.accuracy,
            metrics.f1,
            metrics.log_loss,
            metrics.duration_seconds,
            200,
        );
        assert_eq!(metrics.score, expected);
        assert!(notifier.subjects().is_empty());
    }

    #[tokio::test]
    async fn training_failure_prunes_and_notifies_once() {
        let (train, val) = datasets();
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = TrialExecutor::new(
            Arc::new(FakeTrainer::failing_when(|_| true)),
            notifier.clone(),
        );

        let outcome = executor.execute(3, &config(), &train, &val).await;
        match outcome {
            TrialOutcome::Pruned(PruneReason::TrainingFailed(msg)) => {
                assert!(msg.contains("out of memory"))
            }
            other => panic!("expected pruned, got {other:?}"),
        }
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Training Error");
        assert!(sent[0].1.starts_with("Trial 3 failed.\nDepth=6 Iter=400 L2=1.00000"));
    }

    #[tokio::test]
    async fn notification_failure_still_prunes() {
        let (train, val) = datasets();
        let executor = TrialExecutor::new(
            Arc::new(FakeTrainer::failing_when(|_| true)),
            Arc::new(RecordingNotifier::failing()),
        );
        let outcome = executor.execute(0, &config(), &train, &val).await;
        assert!(outcome.is_pruned());
    }

    #[tokio::test]
    async fn empty_filtered_validation_set_fails() {
        let (train, _) = datasets();
        let val = Dataset::new(
            train.feature_names().to_vec(),
            vec![vec![0.0, 0.0, 0.0]],
            vec![42],
        )
        .unwrap();
        let trainer = Arc::new(FakeTrainer::ok());
        let executor = TrialExecutor::new(trainer.clone(), Arc::new(RecordingNotifier::default()));
        let outcome = executor.execute(0, &config(), &train, &val).await;
        assert!(matches!(
            outcome,
            TrialOutcome::Failed(SweepError::Evaluation(EvaluationError::EmptyValidationSet))
        ));
        assert_eq!(trainer.calls(), 0);
    }
}
