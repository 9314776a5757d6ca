//! Sweep configuration document.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config_error;
use crate::errors::SweepResult;
use crate::params::FixedParams;

/// Top-level configuration for a sweep, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub train_path: PathBuf,
    pub val_path: PathBuf,
    /// Ordered feature column names.
    pub feature_columns: Vec<String>,
    pub label_column: String,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Identity of the persisted search state.
    #[serde(default = "default_study_name")]
    pub study_name: String,
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_window_hours")]
    pub heartbeat_window_hours: u64,
    /// Locks older than this are considered abandoned by a crashed writer.
    #[serde(default = "default_lock_stale_secs")]
    pub ledger_lock_stale_secs: u64,
    /// Running study trials of other sessions older than this were left by a
    /// dead process.
    #[serde(default = "default_study_orphan_hours")]
    pub study_orphan_hours: u64,
    /// Seed for the sampler's random source. `None` = entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub trainer: TrainerSettings,
    #[serde(default)]
    pub top_k: TopKSettings,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_study_name() -> String {
    "catboost_sweep".to_string()
}

fn default_max_trials() -> usize {
    99_999
}

fn default_heartbeat_interval_secs() -> u64 {
    900
}

fn default_heartbeat_window_hours() -> u64 {
    4
}

fn default_lock_stale_secs() -> u64 {
    600
}

fn default_study_orphan_hours() -> u64 {
    24
}

/// Upper bound for second-valued settings: one week.
const MAX_SECS: u64 = 7 * 24 * 3600;
/// Upper bound for hour-valued settings: one year.
const MAX_HOURS: u64 = 365 * 24;

/// How to reach the trainer and which fixed parameters every trial carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// External training program. Required by the command-backed trainer.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub task_type: String,
    pub eval_metric: String,
    pub loss_function: String,
    pub verbose: u32,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        let fixed = FixedParams::default();
        Self {
            command: None,
            args: Vec::new(),
            task_type: fixed.task_type,
            eval_metric: fixed.eval_metric,
            loss_function: fixed.loss_function,
            verbose: fixed.verbose,
        }
    }
}

impl TrainerSettings {
    pub fn fixed_params(&self) -> FixedParams {
        FixedParams {
            eval_metric: self.eval_metric.clone(),
            loss_function: self.loss_function.clone(),
            task_type: self.task_type.clone(),
            verbose: self.verbose,
        }
    }
}

/// Extended-budget retraining of the best ledger trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopKSettings {
    pub k: usize,
    pub iterations: u32,
    pub early_stopping_rounds: u32,
    pub verbose: u32,
    pub eval_metric: String,
    /// Cut-offs for precision/recall/F1 at rank.
    pub ranks: Vec<usize>,
    pub output_dir: PathBuf,
}

impl Default for TopKSettings {
    fn default() -> Self {
        Self {
            k: 3,
            iterations: 10_000,
            early_stopping_rounds: 300,
            verbose: 100,
            eval_metric: "MultiClass".to_string(),
            ranks: vec![1, 5, 30],
            output_dir: PathBuf::from("final_models"),
        }
    }
}

impl SweepConfig {
    pub fn new(
        train_path: impl Into<PathBuf>,
        val_path: impl Into<PathBuf>,
        feature_columns: Vec<String>,
        label_column: impl Into<String>,
    ) -> Self {
        Self {
            train_path: train_path.into(),
            val_path: val_path.into(),
            feature_columns,
            label_column: label_column.into(),
            results_dir: default_results_dir(),
            study_name: default_study_name(),
            max_trials: default_max_trials(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_window_hours: default_heartbeat_window_hours(),
            ledger_lock_stale_secs: default_lock_stale_secs(),
            study_orphan_hours: default_study_orphan_hours(),
            seed: None,
            trainer: TrainerSettings::default(),
            top_k: TopKSettings::default(),
        }
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> SweepResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {}", path.display(), e))?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> SweepResult<()> {
        if self.feature_columns.is_empty() {
            return Err(config_error!("feature_columns must not be empty"));
        }
        if self.label_column.trim().is_empty() {
            return Err(config_error!("label_column must not be empty"));
        }
        if self.feature_columns.contains(&self.label_column) {
            return Err(config_error!(
                "label_column {} is also listed as a feature",
                self.label_column
            ));
        }
        if self.study_name.trim().is_empty() {
            return Err(config_error!("study_name must not be empty"));
        }
        if !(1..=MAX_SECS).contains(&self.heartbeat_interval_secs) {
            return Err(config_error!("heartbeat_interval_secs must be between 1 and {}", MAX_SECS));
        }
        if !(1..=MAX_HOURS).contains(&self.heartbeat_window_hours) {
            return Err(config_error!("heartbeat_window_hours must be between 1 and {}", MAX_HOURS));
        }
        if !(1..=MAX_SECS).contains(&self.ledger_lock_stale_secs) {
            return Err(config_error!("ledger_lock_stale_secs must be between 1 and {}", MAX_SECS));
        }
        if !(1..=MAX_HOURS).contains(&self.study_orphan_hours) {
            return Err(config_error!("study_orphan_hours must be between 1 and {}", MAX_HOURS));
        }
        if self.top_k.k == 0 {
            return Err(config_error!("top_k.k must be positive"));
        }
        if self.top_k.ranks.is_empty() || self.top_k.ranks.contains(&0) {
            return Err(config_error!("top_k.ranks must be a non-empty list of positive ranks"));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.results_dir.join("sweep_log.csv")
    }

    pub fn study_path(&self) -> PathBuf {
        self.results_dir.join(format!("{}.study.jsonl", self.study_name))
    }

    pub fn heartbeat_plot_path(&self) -> PathBuf {
        self.results_dir.join("heartbeat_score_plot.png")
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::seconds(self.heartbeat_interval_secs.min(MAX_SECS) as i64)
    }

    pub fn heartbeat_window(&self) -> Duration {
        Duration::hours(self.heartbeat_window_hours.min(MAX_HOURS) as i64)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::seconds(self.ledger_lock_stale_secs.min(MAX_SECS) as i64)
    }

    pub fn study_orphan_after(&self) -> Duration {
        Duration::hours(self.study_orphan_hours.min(MAX_HOURS) as i64)
    }
}
