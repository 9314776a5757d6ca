//! Per-trial configuration artifacts and top-K model exports.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use sl_types::{Configuration, SweepResult};

use crate::fsutil::{atomic_write_bytes, ensure_dir};

/// Directory of per-trial files whose names carry timestamp and score.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> SweepResult<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name for a trial's configuration, e.g.
    /// `20250301_101500_trial7_score0.8123_config.json`.
    pub fn config_file_name(trial_index: u64, timestamp: DateTime<Utc>, score: f64) -> String {
        format!(
            "{}_trial{}_score{:.4}_config.json",
            timestamp.format("%Y%m%d_%H%M%S"),
            trial_index,
            score
        )
    }

    /// Persist the sampled configuration of a completed trial.
    pub fn write_config(
        &self,
        trial_index: u64,
        config: &Configuration,
        timestamp: DateTime<Utc>,
        score: f64,
    ) -> SweepResult<PathBuf> {
        let path = self
            .root
            .join(Self::config_file_name(trial_index, timestamp, score));
        let bytes = serde_json::to_vec_pretty(config)?;
        atomic_write_bytes(&path, &bytes)?;
        debug!("Wrote trial config {}", path.display());
        Ok(path)
    }

    /// Paths for one exported top-K model, sharing rank and timestamp.
    pub fn model_export_paths(&self, rank: usize, timestamp: DateTime<Utc>) -> ModelExportPaths {
        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        ModelExportPaths {
            model: self.root.join(format!("model_K{rank}_{stamp}.cbm")),
            plot: self.root.join(format!("loss_plot_K{rank}_{stamp}.png")),
            metrics: self.root.join(format!("metrics_K{rank}_{stamp}.txt")),
        }
    }

    /// Durably write raw bytes under the store.
    pub fn write_bytes(&self, path: &Path, bytes: &[u8]) -> SweepResult<()> {
        atomic_write_bytes(path, bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelExportPaths {
    pub model: PathBuf,
    pub plot: PathBuf,
    pub metrics: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::FixedParams;
    use tempfile::tempdir;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn file_name_embeds_timestamp_and_score() {
        let name = ArtifactStore::config_file_name(7, ts(), 0.812345);
        assert_eq!(name, "20250301_101500_trial7_score0.8123_config.json");
    }

    #[test]
    fn writes_config_json() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("results")).unwrap();
        let config = Configuration::new(250, 8, 0.2, 3.0, 0.1, &FixedParams::default());
        let path = store.write_config(1, &config, ts(), 0.5).unwrap();
        let back: Configuration = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn export_paths_share_rank_and_stamp() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let paths = store.model_export_paths(2, ts());
        assert!(paths.model.ends_with("model_K2_20250301_101500.cbm"));
        assert!(paths.plot.ends_with("loss_plot_K2_20250301_101500.png"));
        assert!(paths.metrics.ends_with("metrics_K2_20250301_101500.txt"));
    }
}
