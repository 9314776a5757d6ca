//! Sweep alert types and their operator-facing rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Training errors are cut to this many leading characters.
pub const TRIAL_ERROR_LIMIT: usize = 240;
/// Crash reports keep this many trailing characters.
pub const CRASH_REPORT_LIMIT: usize = 500;

/// Severity of a sweep alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Routine progress report.
    Info,
    /// A trial was lost or the sweep was stopped by hand.
    Warning,
    /// The sweep died.
    Critical,
}

/// Discriminant for the kind of sweep alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepAlertKind {
    /// Training a sampled configuration failed; the trial was pruned.
    TrialFailed {
        trial_index: u64,
        depth: u32,
        iterations: u32,
        l2_leaf_reg: f64,
        error: String,
    },
    /// Periodic summary of recent ledger activity.
    Heartbeat {
        /// `None` until a trial has completed.
        best_score: Option<f64>,
        window_hours: i64,
        /// Change of the running best across the window, if it had records.
        delta: Option<f64>,
    },
    /// Operator stopped the sweep.
    Interrupted { best_score: Option<f64> },
    /// Unhandled error ended the sweep.
    Crashed { report: String },
    /// Trial budget exhausted.
    Finished { best_score: Option<f64> },
    /// A top-K model finished retraining.
    ModelTrained {
        rank: usize,
        accuracy: f64,
        f1: f64,
        /// F1@k for each reported k.
        f1_at: Vec<(usize, f64)>,
    },
}

/// A single alert bound for the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAlert {
    pub timestamp: DateTime<Utc>,
    pub kind: SweepAlertKind,
    /// Chart to attach, when one was rendered.
    pub image: Option<PathBuf>,
}

impl SweepAlert {
    pub fn new(kind: SweepAlertKind) -> Self {
        Self::at(kind, Utc::now())
    }

    pub fn at(kind: SweepAlertKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn severity(&self) -> AlertSeverity {
        match self.kind {
            SweepAlertKind::Heartbeat { .. }
            | SweepAlertKind::Finished { .. }
            | SweepAlertKind::ModelTrained { .. } => AlertSeverity::Info,
            SweepAlertKind::TrialFailed { .. } | SweepAlertKind::Interrupted { .. } => {
                AlertSeverity::Warning
            }
            SweepAlertKind::Crashed { .. } => AlertSeverity::Critical,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self.kind {
            SweepAlertKind::TrialFailed { .. } => "Training Error",
            SweepAlertKind::Heartbeat { .. } => "Sweep Heartbeat",
            SweepAlertKind::Interrupted { .. } => "Sweep Interrupted",
            SweepAlertKind::Crashed { .. } => "Sweep Crashed",
            SweepAlertKind::Finished { .. } => "Sweep Finished",
            SweepAlertKind::ModelTrained { .. } => "Model Training Update",
        }
    }

    pub fn body(&self) -> String {
        let now = self.timestamp.format("%y%m%d_%H:%M:%S");
        match &self.kind {
            SweepAlertKind::TrialFailed {
                trial_index,
                depth,
                iterations,
                l2_leaf_reg,
                error,
            } => format!(
                "Trial {} failed.\nDepth={} Iter={} L2={:.5}\nError: {}",
                trial_index,
                depth,
                iterations,
                l2_leaf_reg,
                head_chars(error, TRIAL_ERROR_LIMIT)
            ),
            SweepAlertKind::Heartbeat {
                best_score,
                window_hours,
                delta,
            } => {
                let mut body = match best_score {
                    Some(best) => format!("Best score: {:.4} at {}", best, now),
                    None => format!("No completed trials yet at {}", now),
                };
                if let Some(delta) = delta {
                    body.push_str(&format!(
                        "\nBest score change in last {}hr: {:+.4}",
                        window_hours, delta
                    ));
                }
                body
            }
            SweepAlertKind::Interrupted { best_score } => match best_score {
                Some(best) => format!("Stopped manually. Best score: {:.4} at {}", best, now),
                None => format!("Stopped manually at {}. No completed trials", now),
            },
            SweepAlertKind::Crashed { report } => tail_chars(report, CRASH_REPORT_LIMIT).to_string(),
            SweepAlertKind::Finished { best_score } => match best_score {
                Some(best) => format!("Completed successfully at {}. Best score: {:.4}", now, best),
                None => format!("Completed successfully at {}. No completed trials", now),
            },
            SweepAlertKind::ModelTrained {
                rank,
                accuracy,
                f1,
                f1_at,
            } => {
                let at_k = f1_at
                    .iter()
                    .map(|(k, v)| format!("F1@{}: {:.4}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "Model K={} Training Complete\nOverall F1: {:.4}, Acc: {:.4}\n{}",
                    rank, f1, accuracy, at_k
                )
            }
        }
    }
}

/// First `n` characters of `s`, on a char boundary.
fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `n` characters of `s`, on a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    match s.char_indices().nth(count - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:15:30Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Critical);
        let crash = SweepAlert::new(SweepAlertKind::Crashed { report: "x".into() });
        assert_eq!(crash.severity(), AlertSeverity::Critical);
    }

    #[test]
    fn trial_failure_body_truncates_error() {
        let alert = SweepAlert::at(
            SweepAlertKind::TrialFailed {
                trial_index: 12,
                depth: 7,
                iterations: 450,
                l2_leaf_reg: 0.0123456,
                error: "e".repeat(1000),
            },
            ts(),
        );
        let body = alert.body();
        assert!(body.starts_with("Trial 12 failed.\nDepth=7 Iter=450 L2=0.01235\nError: "));
        let error_part = body.rsplit("Error: ").next().unwrap();
        assert_eq!(error_part.len(), TRIAL_ERROR_LIMIT);
        assert_eq!(alert.subject(), "Training Error");
    }

    #[test]
    fn heartbeat_body_with_and_without_delta() {
        let with = SweepAlert::at(
            SweepAlertKind::Heartbeat {
                best_score: Some(0.8123),
                window_hours: 4,
                delta: Some(0.2),
            },
            ts(),
        );
        assert_eq!(
            with.body(),
            "Best score: 0.8123 at 250301_10:15:30\nBest score change in last 4hr: +0.2000"
        );

        let without = SweepAlert::at(
            SweepAlertKind::Heartbeat {
                best_score: Some(0.8123),
                window_hours: 4,
                delta: None,
            },
            ts(),
        );
        assert_eq!(without.body(), "Best score: 0.8123 at 250301_10:15:30");
    }

    #[test]
    fn crash_body_keeps_tail() {
        let report = format!("{}END", "x".repeat(600));
        let alert = SweepAlert::new(SweepAlertKind::Crashed { report });
        let body = alert.body();
        assert_eq!(body.chars().count(), CRASH_REPORT_LIMIT);
        assert!(body.ends_with("END"));
    }

    #[test]
    fn lifecycle_bodies() {
        let stopped = SweepAlert::at(SweepAlertKind::Interrupted { best_score: Some(0.5) }, ts());
        assert_eq!(
            stopped.body(),
            "Stopped manually. Best score: 0.5000 at 250301_10:15:30"
        );
        let finished = SweepAlert::at(SweepAlertKind::Finished { best_score: Some(0.5) }, ts());
        assert_eq!(
            finished.body(),
            "Completed successfully at 250301_10:15:30. Best score: 0.5000"
        );
    }

    #[test]
    fn bodies_without_completed_trials() {
        let stopped = SweepAlert::at(SweepAlertKind::Interrupted { best_score: None }, ts());
        assert_eq!(
            stopped.body(),
            "Stopped manually at 250301_10:15:30. No completed trials"
        );
        let finished = SweepAlert::at(SweepAlertKind::Finished { best_score: None }, ts());
        assert_eq!(
            finished.body(),
            "Completed successfully at 250301_10:15:30. No completed trials"
        );
        let heartbeat = SweepAlert::at(
            SweepAlertKind::Heartbeat {
                best_score: None,
                window_hours: 4,
                delta: None,
            },
            ts(),
        );
        assert_eq!(heartbeat.body(), "No completed trials yet at 250301_10:15:30");
        assert!(!stopped.body().contains("inf"));
    }

    #[test]
    fn model_trained_body() {
        let alert = SweepAlert::new(SweepAlertKind::ModelTrained {
            rank: 2,
            accuracy: 0.75,
            f1: 0.7,
            f1_at: vec![(1, 0.7), (5, 0.3), (30, 0.06)],
        });
        assert_eq!(
            alert.body(),
            "Model K=2 Training Complete\nOverall F1: 0.7000, Acc: 0.7500\nF1@1: 0.7000, F1@5: 0.3000, F1@30: 0.0600"
        );
        assert_eq!(alert.subject(), "Model Training Update");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(300);
        assert_eq!(head_chars(&s, 240).chars().count(), 240);
        assert_eq!(tail_chars(&s, 10).chars().count(), 10);
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[test]
    fn alert_serialization_roundtrip() {
        let alert = SweepAlert::at(SweepAlertKind::Finished { best_score: Some(0.9) }, ts())
            .with_image("results/heartbeat_score_plot.png");
        let json = serde_json::to_string(&alert).unwrap();
        let back: SweepAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alert);
    }
}
