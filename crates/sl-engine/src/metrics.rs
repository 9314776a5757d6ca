//! Classification metrics over predicted class probabilities.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use sl_types::EvaluationError;

/// Probabilities are clipped into [EPS, 1 - EPS] before taking logs.
const LOG_LOSS_EPS: f64 = 1e-15;

/// Overall quality of a fitted model on one eval set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub f1: f64,
    pub log_loss: f64,
}

/// Precision, recall and F1 for top-K ranking of class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingMetrics {
    pub k: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

fn check_inputs(len_true: usize, len_other: usize) -> Result<(), EvaluationError> {
    if len_true == 0 {
        return Err(EvaluationError::EmptyValidationSet);
    }
    if len_true != len_other {
        return Err(EvaluationError::LengthMismatch {
            expected: len_true,
            actual: len_other,
        });
    }
    Ok(())
}

/// Most probable class for each row; ties go to the earlier column.
pub fn predict(probabilities: &[Vec<f64>], classes: &[i64]) -> Result<Vec<i64>, EvaluationError> {
    if classes.is_empty() {
        return Err(EvaluationError::NoClasses);
    }
    probabilities
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (i, &p)| match best {
                    Some((_, bp)) if bp >= p => best,
                    _ => Some((i, p)),
                })
                .and_then(|(i, _)| classes.get(i).copied())
                .ok_or(EvaluationError::LengthMismatch {
                    expected: classes.len(),
                    actual: row.len(),
                })
        })
        .collect()
}

pub fn accuracy(y_true: &[i64], y_pred: &[i64]) -> Result<f64, EvaluationError> {
    check_inputs(y_true.len(), y_pred.len())?;
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Per-class F1 averaged with weights equal to each class's true support.
pub fn weighted_f1(y_true: &[i64], y_pred: &[i64]) -> Result<f64, EvaluationError> {
    check_inputs(y_true.len(), y_pred.len())?;

    #[derive(Default)]
    struct Counts {
        tp: usize,
        fp: usize,
        fn_: usize,
    }

    let mut counts: HashMap<i64, Counts> = HashMap::new();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t == p {
            counts.entry(t).or_default().tp += 1;
        } else {
            counts.entry(t).or_default().fn_ += 1;
            counts.entry(p).or_default().fp += 1;
        }
    }

    let total = y_true.len() as f64;
    let weighted = counts
        .values()
        .map(|c| {
            let support = (c.tp + c.fn_) as f64;
            let denom = 2 * c.tp + c.fp + c.fn_;
            let f1 = if denom == 0 {
                0.0
            } else {
                2.0 * c.tp as f64 / denom as f64
            };
            f1 * support
        })
        .sum::<f64>();
    Ok(weighted / total)
}

/// Mean negative log-likelihood of the true labels.
///
/// Rows are clipped and renormalised; a label outside `classes` is an error.
pub fn log_loss(
    y_true: &[i64],
    probabilities: &[Vec<f64>],
    classes: &[i64],
) -> Result<f64, EvaluationError> {
    check_inputs(y_true.len(), probabilities.len())?;
    if classes.is_empty() {
        return Err(EvaluationError::NoClasses);
    }
    let column: HashMap<i64, usize> = classes.iter().enumerate().map(|(i, &c)| (c, i)).collect();

    let mut total = 0.0;
    for (&label, row) in y_true.iter().zip(probabilities) {
        let idx = *column
            .get(&label)
            .ok_or(EvaluationError::UnknownLabel { label })?;
        if row.len() != classes.len() {
            return Err(EvaluationError::LengthMismatch {
                expected: classes.len(),
                actual: row.len(),
            });
        }
        let clipped: Vec<f64> = row
            .iter()
            .map(|p| p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS))
            .collect();
        let norm: f64 = clipped.iter().sum();
        total -= (clipped[idx] / norm).ln();
    }
    Ok(total / y_true.len() as f64)
}

/// Accuracy, weighted F1 and log loss in one pass over the eval set.
pub fn classification_report(
    y_true: &[i64],
    probabilities: &[Vec<f64>],
    classes: &[i64],
) -> Result<ClassificationReport, EvaluationError> {
    let y_pred = predict(probabilities, classes)?;
    Ok(ClassificationReport {
        accuracy: accuracy(y_true, &y_pred)?,
        f1: weighted_f1(y_true, &y_pred)?,
        log_loss: log_loss(y_true, probabilities, classes)?,
    })
}

/// The `k` most probable classes of a row, most probable first.
pub fn top_k_labels(row: &[f64], classes: &[i64], k: usize) -> Vec<i64> {
    let mut order: Vec<usize> = (0..row.len().min(classes.len())).collect();
    order.sort_by(|&a, &b| row[b].total_cmp(&row[a]).then(a.cmp(&b)));
    order.into_iter().take(k).map(|i| classes[i]).collect()
}

/// Ranking metrics at `k`.
///
/// A sample whose true label sits at 0-based position `r` of its top-k list
/// scores precision `1 / (r + 1)` and recall 1; otherwise both are 0. Both
/// are averaged over samples and F1 is their harmonic mean.
pub fn precision_recall_at_k(
    y_true: &[i64],
    probabilities: &[Vec<f64>],
    classes: &[i64],
    k: usize,
) -> Result<RankingMetrics, EvaluationError> {
    check_inputs(y_true.len(), probabilities.len())?;
    if classes.is_empty() {
        return Err(EvaluationError::NoClasses);
    }

    let (precision_sum, recall_sum) = y_true
        .par_iter()
        .zip(probabilities.par_iter())
        .map(|(label, row)| {
            let top = top_k_labels(row, classes, k);
            match top.iter().position(|c| c == label) {
                Some(rank) => (1.0 / (rank as f64 + 1.0), 1.0),
                None => (0.0, 0.0),
            }
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    let n = y_true.len() as f64;
    let precision = precision_sum / n;
    let recall = recall_sum / n;
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    Ok(RankingMetrics {
        k,
        precision,
        recall,
        f1,
    })
}

/// Labels present in `y_true` but missing from `classes`.
pub fn unseen_labels(y_true: &[i64], classes: &[i64]) -> BTreeSet<i64> {
    let known: BTreeSet<i64> = classes.iter().copied().collect();
    y_true.iter().filter(|l| !known.contains(l)).copied().collect()
}
