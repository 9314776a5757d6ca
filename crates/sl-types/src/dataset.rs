//! In-memory feature/label tables.

use std::collections::BTreeSet;

use crate::errors::{DataError, SweepResult};

/// A dense feature matrix with one integer class label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    labels: Vec<i64>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>, rows: Vec<Vec<f64>>, labels: Vec<i64>) -> SweepResult<Self> {
        if rows.len() != labels.len() {
            return Err(DataError::InvalidFormat {
                message: format!("{} feature rows but {} labels", rows.len(), labels.len()),
            }
            .into());
        }
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != feature_names.len())
        {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    feature_names.len()
                ),
            }
            .into());
        }
        Ok(Self {
            feature_names,
            rows,
            labels,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Distinct labels, ascending.
    pub fn label_set(&self) -> BTreeSet<i64> {
        self.labels.iter().copied().collect()
    }

    /// Keep only rows whose label appears in `allowed`.
    pub fn restrict_to_labels(&self, allowed: &BTreeSet<i64>) -> Dataset {
        let (rows, labels) = self
            .rows
            .iter()
            .zip(&self.labels)
            .filter(|(_, label)| allowed.contains(label))
            .map(|(row, label)| (row.clone(), *label))
            .unzip();
        Dataset {
            feature_names: self.feature_names.clone(),
            rows,
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Dataset {
        Dataset::new(
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
            vec![0, 7, 1],
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_rows() {
        let result = Dataset::new(vec!["a".into()], vec![vec![1.0, 2.0]], vec![0]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let result = Dataset::new(vec!["a".into()], vec![vec![1.0]], vec![0, 1]);
        assert!(result.is_err());
    }

    #[test]
    fn restricts_to_known_labels() {
        let allowed: BTreeSet<i64> = [0, 1].into_iter().collect();
        let filtered = table().restrict_to_labels(&allowed);
        assert_eq!(filtered.labels(), &[0, 1]);
        assert_eq!(filtered.rows(), &[vec![1.0, 2.0], vec![5.0, 6.0]]);
        assert_eq!(filtered.feature_names(), table().feature_names());
    }

    #[test]
    fn restriction_can_empty_the_table() {
        let allowed: BTreeSet<i64> = [42].into_iter().collect();
        assert!(table().restrict_to_labels(&allowed).is_empty());
    }

    #[test]
    fn label_set_is_sorted_and_distinct() {
        let set: Vec<i64> = table().label_set().into_iter().collect();
        assert_eq!(set, vec![0, 1, 7]);
    }
}
