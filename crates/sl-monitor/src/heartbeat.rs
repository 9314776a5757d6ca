//! Periodic progress reports built from recent ledger activity.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use sl_types::TrialRecord;

use crate::alerts::{SweepAlert, SweepAlertKind};
use crate::chart::{render_line_chart, ChartSeries, ChartSpec};
use crate::notify::{dispatch, Notifier};

/// Scores inside the trailing window, in time order, with their running max.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub timestamps: Vec<DateTime<Utc>>,
    pub scores: Vec<f64>,
    pub cummax: Vec<f64>,
}

impl WindowSummary {
    /// Build from records already restricted to the window.
    pub fn from_records(records: &[&TrialRecord]) -> Self {
        let mut ordered: Vec<&TrialRecord> = records.to_vec();
        ordered.sort_by_key(|r| r.timestamp);

        let mut running = f64::NEG_INFINITY;
        let mut cummax = Vec::with_capacity(ordered.len());
        for record in &ordered {
            running = running.max(record.score);
            cummax.push(running);
        }

        Self {
            timestamps: ordered.iter().map(|r| r.timestamp).collect(),
            scores: ordered.iter().map(|r| r.score).collect(),
            cummax,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Last minus first value of the running max.
    pub fn delta(&self) -> Option<f64> {
        Some(self.cummax.last()? - self.cummax.first()?)
    }

    /// Raw and running-max series, x in hours since the first record.
    pub fn series(&self) -> Vec<ChartSeries> {
        let Some(start) = self.timestamps.first().copied() else {
            return Vec::new();
        };
        let hours: Vec<f64> = self
            .timestamps
            .iter()
            .map(|t| (*t - start).num_milliseconds() as f64 / 3_600_000.0)
            .collect();
        vec![
            ChartSeries::new(
                "score",
                hours.iter().copied().zip(self.scores.iter().copied()).collect(),
            ),
            ChartSeries::new(
                "best so far",
                hours.iter().copied().zip(self.cummax.iter().copied()).collect(),
            ),
        ]
    }
}

/// What a heartbeat produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatReport {
    pub alert: SweepAlert,
    pub summary: WindowSummary,
    pub delivered: bool,
}

/// Time-gated reporter: idle until `interval` has passed since the last beat.
#[derive(Debug, Clone)]
pub struct HeartbeatReporter {
    interval: Duration,
    window: Duration,
    plot_path: PathBuf,
}

impl HeartbeatReporter {
    pub fn new(interval: Duration, window: Duration, plot_path: impl Into<PathBuf>) -> Self {
        Self {
            interval,
            window,
            plot_path: plot_path.into(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn plot_path(&self) -> &Path {
        &self.plot_path
    }

    pub fn is_due(&self, last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_heartbeat >= self.interval
    }

    /// Build the heartbeat alert for `window_records`, rendering the chart
    /// when the window is non-empty.
    pub fn prepare(
        &self,
        window_records: &[&TrialRecord],
        best_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> (SweepAlert, WindowSummary) {
        let summary = WindowSummary::from_records(window_records);
        let mut alert = SweepAlert::at(
            SweepAlertKind::Heartbeat {
                best_score,
                window_hours: self.window.num_hours(),
                delta: summary.delta(),
            },
            now,
        );

        if !summary.is_empty() {
            let spec = ChartSpec {
                title: "Sweep Score Progress",
                x_label: "hours",
                y_label: "score",
            };
            match render_line_chart(&self.plot_path, &spec, &summary.series()) {
                Ok(true) => alert = alert.with_image(&self.plot_path),
                Ok(false) => {}
                Err(e) => warn!("Heartbeat chart failed: {}", e),
            }
        }
        (alert, summary)
    }

    /// Emit a heartbeat. Delivery failure is logged, never raised.
    pub async fn report(
        &self,
        window_records: &[&TrialRecord],
        best_score: Option<f64>,
        now: DateTime<Utc>,
        notifier: &dyn Notifier,
    ) -> HeartbeatReport {
        let (alert, summary) = self.prepare(window_records, best_score, now);
        debug!(
            "Heartbeat: {} records in window, best {:?}",
            summary.scores.len(),
            best_score
        );
        let delivered = dispatch(notifier, &alert).await;
        HeartbeatReport {
            alert,
            summary,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyResult;
    use async_trait::async_trait;
    use sl_types::TrialMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(idx: u64, score: f64, at: DateTime<Utc>) -> TrialRecord {
        let metrics = TrialMetrics {
            accuracy: 0.5,
            f1: 0.5,
            log_loss: 1.0,
            duration_seconds: 1.0,
            iterations: 100,
            score,
        };
        TrialRecord::new(idx, format!("key{idx}"), &metrics, at)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        async fn notify(&self, _: &str, _: &str, _: Option<&Path>) -> NotifyResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn due_after_interval() {
        let hb = HeartbeatReporter::new(Duration::seconds(900), Duration::hours(4), "p.png");
        let last = now();
        assert!(!hb.is_due(last, last + Duration::seconds(899)));
        assert!(hb.is_due(last, last + Duration::seconds(900)));
    }

    #[test]
    fn summary_cummax_and_delta() {
        let a = record(0, 0.4, now() - Duration::hours(3));
        let b = record(1, 0.6, now() - Duration::hours(1));
        let c = record(2, 0.5, now() - Duration::minutes(30));
        // Out of order on purpose.
        let summary = WindowSummary::from_records(&[&c, &a, &b]);
        assert_eq!(summary.scores, vec![0.4, 0.6, 0.5]);
        assert_eq!(summary.cummax, vec![0.4, 0.6, 0.6]);
        assert!((summary.delta().unwrap() - 0.2).abs() < 1e-12);

        let series = summary.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points[0].0, 0.0);
        assert!((series[0].points[1].0 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_has_no_delta_or_image() {
        let dir = tempfile::tempdir().unwrap();
        let hb = HeartbeatReporter::new(
            Duration::seconds(900),
            Duration::hours(4),
            dir.path().join("hb.png"),
        );
        let (alert, summary) = hb.prepare(&[], Some(0.77), now());
        assert!(summary.is_empty());
        assert!(alert.image.is_none());
        assert_eq!(alert.body(), "Best score: 0.7700 at 250301_12:00:00");
    }

    #[cfg(feature = "plotters")]
    #[test]
    fn non_empty_window_attaches_chart() {
        let dir = tempfile::tempdir().unwrap();
        let plot = dir.path().join("hb.png");
        let hb = HeartbeatReporter::new(Duration::seconds(900), Duration::hours(4), &plot);
        let a = record(0, 0.4, now() - Duration::hours(3));
        let b = record(1, 0.6, now() - Duration::hours(1));
        let (alert, _) = hb.prepare(&[&a, &b], Some(0.6), now());
        assert_eq!(alert.image.as_deref(), Some(plot.as_path()));
        assert!(std::fs::metadata(&plot).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn report_sends_exactly_one_notification() {
        let dir = tempfile::tempdir().unwrap();
        let hb = HeartbeatReporter::new(
            Duration::seconds(900),
            Duration::hours(4),
            dir.path().join("hb.png"),
        );
        let a = record(0, 0.4, now() - Duration::hours(3));
        let b = record(1, 0.6, now() - Duration::hours(1));
        let notifier = Counting::default();
        let report = hb.report(&[&a, &b], Some(0.6), now(), &notifier).await;
        assert!(report.delivered);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
        assert!(report
            .alert
            .body()
            .ends_with("Best score change in last 4hr: +0.2000"));
    }
}
