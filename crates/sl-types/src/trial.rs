//! Trial records and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SweepError, SweepResult};
use crate::params::Configuration;

/// Metrics produced by one successful training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub accuracy: f64,
    pub f1: f64,
    pub log_loss: f64,
    pub duration_seconds: f64,
    /// Boosting iterations the trained model actually kept.
    pub iterations: usize,
    /// Composite score.
    pub score: f64,
}

/// One durable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Process-local ordinal; advisory only across restarts.
    pub trial_index: u64,
    pub config_key: String,
    pub score: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub loss: f64,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

impl TrialRecord {
    pub fn new(
        trial_index: u64,
        config_key: String,
        metrics: &TrialMetrics,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            trial_index,
            config_key,
            score: metrics.score,
            accuracy: metrics.accuracy,
            f1: metrics.f1,
            loss: metrics.log_loss,
            duration_seconds: metrics.duration_seconds,
            timestamp,
        }
    }

    /// Decode the configuration this row was trained with.
    pub fn configuration(&self) -> SweepResult<Configuration> {
        Configuration::from_key(&self.config_key)
    }
}

/// Why a trial was abandoned without being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruneReason {
    /// The configuration already has a durable ledger row.
    Duplicate,
    /// The trainer raised; the message is kept for the operator.
    TrainingFailed(String),
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "duplicate configuration"),
            Self::TrainingFailed(message) => write!(f, "training failed: {message}"),
        }
    }
}

/// Result of executing one trial.
#[derive(Debug)]
pub enum TrialOutcome {
    Completed(TrialMetrics),
    Pruned(PruneReason),
    /// Not recoverable at the trial level; the sweep must stop.
    Failed(SweepError),
}

impl TrialOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_pruned(&self) -> bool {
        matches!(self, Self::Pruned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FixedParams;

    fn metrics() -> TrialMetrics {
        TrialMetrics {
            accuracy: 0.8,
            f1: 0.75,
            log_loss: 0.6,
            duration_seconds: 12.5,
            iterations: 420,
            score: 0.62,
        }
    }

    #[test]
    fn record_copies_metrics() {
        let now = Utc::now();
        let record = TrialRecord::new(3, "{}".into(), &metrics(), now);
        assert_eq!(record.trial_index, 3);
        assert_eq!(record.loss, 0.6);
        assert_eq!(record.duration_seconds, 12.5);
        assert_eq!(record.timestamp, now);
    }

    #[test]
    fn record_decodes_configuration() {
        let config = Configuration::new(300, 5, 0.1, 2.0, 0.5, &FixedParams::default());
        let record = TrialRecord::new(0, config.canonical_key().unwrap(), &metrics(), Utc::now());
        assert_eq!(record.configuration().unwrap(), config);
    }

    #[test]
    fn outcome_predicates() {
        assert!(TrialOutcome::Completed(metrics()).is_completed());
        assert!(TrialOutcome::Pruned(PruneReason::Duplicate).is_pruned());
        assert_eq!(
            PruneReason::TrainingFailed("oom".into()).to_string(),
            "training failed: oom"
        );
    }
}
