//! Extended-budget retraining of the best ledger trials.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use sl_data::{ArtifactStore, ModelExportPaths, TrialLedger};
use sl_monitor::{
    dispatch, render_line_chart, ChartSeries, ChartSpec, Notifier, SweepAlert, SweepAlertKind,
};
use sl_types::{
    Configuration, Dataset, EvaluationError, SweepResult, TopKSettings, TrialRecord,
};

use crate::metrics::{classification_report, precision_recall_at_k, ClassificationReport, RankingMetrics};
use crate::trainer::{FitOutput, FitRequest, Trainer};

/// One exported model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReport {
    /// 1-based position in the score ranking.
    pub rank: usize,
    pub trial_index: u64,
    pub config: Configuration,
    pub trained_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub report: ClassificationReport,
    pub at_k: Vec<RankingMetrics>,
    pub paths: ModelExportPaths,
    pub plot_written: bool,
}

/// Outcome of a retraining batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopKSummary {
    pub exported: Vec<ModelReport>,
    /// Ranks whose retraining failed.
    pub failed: Vec<usize>,
}

/// Apply the extended training budget to a recorded configuration.
pub fn extended_configuration(config: &Configuration, settings: &TopKSettings) -> Configuration {
    let mut extended = config.clone();
    extended.iterations = settings.iterations;
    extended.early_stopping_rounds = Some(settings.early_stopping_rounds);
    extended.use_best_model = Some(true);
    extended.verbose = settings.verbose;
    extended.eval_metric = settings.eval_metric.clone();
    extended
}

/// Plain-text metrics report written next to each model.
pub fn render_metrics_report(
    rank: usize,
    stamp: &str,
    duration_seconds: f64,
    report: &ClassificationReport,
    at_k: &[RankingMetrics],
) -> String {
    let mut lines = vec![
        format!("Model K={} - Trained on {}", rank, stamp),
        format!("Duration: {:.2} seconds", duration_seconds),
        format!("Overall Accuracy: {:.4}", report.accuracy),
        format!("Overall F1: {:.4}", report.f1),
    ];
    for m in at_k {
        lines.push(format!("Precision@{}: {:.4}", m.k, m.precision));
        lines.push(format!("Recall@{}: {:.4}", m.k, m.recall));
        lines.push(format!("F1@{}: {:.4}", m.k, m.f1));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Retrains the top-K ledger configurations and exports the models.
pub struct TopKRetrainer {
    trainer: Arc<dyn Trainer>,
    notifier: Arc<dyn Notifier>,
    settings: TopKSettings,
    exports: ArtifactStore,
}

impl TopKRetrainer {
    pub fn new(
        trainer: Arc<dyn Trainer>,
        notifier: Arc<dyn Notifier>,
        settings: TopKSettings,
    ) -> SweepResult<Self> {
        let exports = ArtifactStore::new(&settings.output_dir)?;
        Ok(Self {
            trainer,
            notifier,
            settings,
            exports,
        })
    }

    pub fn output_dir(&self) -> &Path {
        self.exports.root()
    }

    /// Retrain the best `k` ledger rows, best first.
    ///
    /// A failed fit is reported and skipped; storage errors abort the batch.
    pub async fn run(
        &self,
        ledger: &TrialLedger,
        train: &Dataset,
        val: &Dataset,
        k: usize,
    ) -> SweepResult<TopKSummary> {
        let top = ledger.top_k(k);
        let mut summary = TopKSummary::default();
        if top.is_empty() {
            warn!("No trials found in {}", ledger.path().display());
            return Ok(summary);
        }

        let filtered = val.restrict_to_labels(&train.label_set());
        if filtered.is_empty() {
            return Err(EvaluationError::EmptyValidationSet.into());
        }

        info!("Retraining top {} of {} trials", top.len(), ledger.len());
        for (i, record) in top.into_iter().enumerate() {
            let rank = i + 1;
            match self.retrain(rank, record, train, &filtered).await? {
                Some(report) => summary.exported.push(report),
                None => summary.failed.push(rank),
            }
        }
        Ok(summary)
    }

    async fn retrain(
        &self,
        rank: usize,
        record: &TrialRecord,
        train: &Dataset,
        val: &Dataset,
    ) -> SweepResult<Option<ModelReport>> {
        let base = match record.configuration() {
            Ok(config) => config,
            Err(e) => {
                warn!("Skipping K={}: unreadable configuration: {}", rank, e);
                return Ok(None);
            }
        };
        let config = extended_configuration(&base, &self.settings);
        info!(
            "K={} (trial {}, score {:.4}): training up to {} iterations",
            rank, record.trial_index, record.score, config.iterations
        );

        let start = Instant::now();
        let fit = self
            .trainer
            .fit(FitRequest {
                config: &config,
                train,
                eval: val,
                use_best_model: true,
            })
            .await
            .and_then(|fit| fit.check_shape(val.len()).map(|_| fit));
        let fit = match fit {
            Ok(fit) => fit,
            Err(e) => {
                warn!("K={} training failed: {}", rank, e);
                let alert = SweepAlert::new(SweepAlertKind::TrialFailed {
                    trial_index: record.trial_index,
                    depth: config.depth,
                    iterations: config.iterations,
                    l2_leaf_reg: config.l2_leaf_reg,
                    error: e.to_string(),
                });
                dispatch(self.notifier.as_ref(), &alert).await;
                return Ok(None);
            }
        };
        let duration_seconds = start.elapsed().as_secs_f64();

        let report = classification_report(val.labels(), &fit.probabilities, &fit.classes)?;
        let at_k = self
            .settings
            .ranks
            .iter()
            .map(|&k| precision_recall_at_k(val.labels(), &fit.probabilities, &fit.classes, k))
            .collect::<Result<Vec<_>, _>>()?;

        let trained_at = Utc::now();
        let stamp = trained_at.format("%Y%m%d_%H%M%S").to_string();
        let paths = self.exports.model_export_paths(rank, trained_at);

        if fit.model.is_empty() {
            warn!("K={}: trainer returned no model bytes", rank);
        }
        self.exports.write_bytes(&paths.model, &fit.model)?;
        self.exports.write_bytes(
            &paths.metrics,
            render_metrics_report(rank, &stamp, duration_seconds, &report, &at_k).as_bytes(),
        )?;
        let plot_written = self.write_curve(rank, &fit, &paths.plot);

        info!(
            "K={} done in {:.1}s: acc {:.4}, f1 {:.4}, saved {}",
            rank,
            duration_seconds,
            report.accuracy,
            report.f1,
            paths.model.display()
        );

        let mut alert = SweepAlert::new(SweepAlertKind::ModelTrained {
            rank,
            accuracy: report.accuracy,
            f1: report.f1,
            f1_at: at_k.iter().map(|m| (m.k, m.f1)).collect(),
        });
        if plot_written {
            alert = alert.with_image(&paths.plot);
        }
        dispatch(self.notifier.as_ref(), &alert).await;

        Ok(Some(ModelReport {
            rank,
            trial_index: record.trial_index,
            config,
            trained_at,
            duration_seconds,
            report,
            at_k,
            paths,
            plot_written,
        }))
    }

    fn write_curve(&self, rank: usize, fit: &FitOutput, path: &Path) -> bool {
        let history = &fit.history;
        if history.learn.is_empty() {
            return false;
        }
        let metric = if history.metric.is_empty() {
            self.settings.eval_metric.as_str()
        } else {
            history.metric.as_str()
        };
        let indexed = |values: &[f64]| -> Vec<(f64, f64)> {
            values.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect()
        };
        let mut series = vec![ChartSeries::new(format!("Train {metric}"), indexed(&history.learn))];
        if !history.validation.is_empty() {
            series.push(ChartSeries::new(
                format!("Validation {metric}"),
                indexed(&history.validation),
            ));
        }
        let title = format!("Model K={rank} Training {metric}");
        let spec = ChartSpec {
            title: &title,
            x_label: "Iteration",
            y_label: metric,
        };
        match render_line_chart(path, &spec, &series) {
            Ok(written) => written,
            Err(e) => {
                warn!("K={} curve chart failed: {}", rank, e);
                false
            }
        }
    }
}
