//! Composite objective used to rank trials.

/// Floor on the duration so instantaneous trials keep a finite score.
pub const EFFICIENCY_EPSILON: f64 = 1e-5;

/// Combine validation quality and training throughput into one maximised score.
///
/// `0.4·accuracy + 0.4·f1 − 0.1·log_loss + 0.1·(iterations / max(duration, ε) / 1000)`
///
/// Scores are unbounded and only comparable within one sweep, since the
/// throughput term depends on the machine.
pub fn score(accuracy: f64, f1: f64, log_loss: f64, duration_seconds: f64, iterations: usize) -> f64 {
    let efficiency = iterations as f64 / duration_seconds.max(EFFICIENCY_EPSILON);
    0.4 * accuracy + 0.4 * f1 - 0.1 * log_loss + 0.1 * (efficiency / 1000.0)
}
