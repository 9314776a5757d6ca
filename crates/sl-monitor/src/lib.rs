//! Operator-facing monitoring for Sweepline.
//!
//! Provides:
//! - Sweep alert catalogue with rendered subjects and bodies
//! - `Notifier` seam with Telegram and log-only sinks
//! - PNG line charts (behind the `plotters` feature)
//! - The time-gated heartbeat reporter

pub mod alerts;
pub mod chart;
pub mod heartbeat;
pub mod notify;

pub use alerts::{AlertSeverity, SweepAlert, SweepAlertKind};
pub use chart::{render_line_chart, ChartSeries, ChartSpec};
pub use heartbeat::{HeartbeatReport, HeartbeatReporter, WindowSummary};
pub use notify::{
    dispatch, escape_markdown_v2, LogNotifier, Notifier, NotifyError, NotifyResult,
    TelegramNotifier,
};
