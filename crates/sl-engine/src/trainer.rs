//! The trainable-classifier capability.
//!
//! The engine never trains models itself. A [`Trainer`] takes a
//! configuration plus train and eval sets and returns class probabilities on
//! the eval set, the training curves and the serialized model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use sl_data::write_csv_dataset;
use sl_types::{Configuration, Dataset, TrainerSettings, TrainingError};

/// Everything a trainer needs for one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub config: &'a Configuration,
    pub train: &'a Dataset,
    pub eval: &'a Dataset,
    /// Keep the iteration with the best eval metric rather than the last one.
    pub use_best_model: bool,
}

/// Per-iteration metric values on the train and eval sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalHistory {
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub learn: Vec<f64>,
    #[serde(default)]
    pub validation: Vec<f64>,
}

/// Result of a successful fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitOutput {
    /// Trees the fitted model kept.
    pub iterations: usize,
    /// Class labels, in probability column order.
    pub classes: Vec<i64>,
    /// One probability row per eval-set sample.
    pub probabilities: Vec<Vec<f64>>,
    #[serde(default)]
    pub history: EvalHistory,
    /// Serialized model.
    #[serde(skip)]
    pub model: Vec<u8>,
}

impl FitOutput {
    /// Check the probability matrix shape against the eval set.
    pub fn check_shape(&self, eval_len: usize) -> Result<(), TrainingError> {
        if self.classes.is_empty() {
            return Err(TrainingError::InvalidResponse {
                message: "trainer reported no classes".to_string(),
            });
        }
        if self.probabilities.len() != eval_len {
            return Err(TrainingError::InvalidResponse {
                message: format!(
                    "expected {} probability rows, got {}",
                    eval_len,
                    self.probabilities.len()
                ),
            });
        }
        if let Some((row, p)) = self
            .probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| p.len() != self.classes.len())
        {
            return Err(TrainingError::InvalidResponse {
                message: format!(
                    "probability row {} has {} columns for {} classes",
                    row,
                    p.len(),
                    self.classes.len()
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait Trainer: Send + Sync {
    async fn fit(&self, request: FitRequest<'_>) -> Result<FitOutput, TrainingError>;
}

/// Request document handed to an external training program.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    pub params: Configuration,
    pub use_best_model: bool,
    pub feature_columns: Vec<String>,
    pub label_column: String,
    pub train_path: PathBuf,
    pub eval_path: PathBuf,
    /// Where the program must write its [`FitOutput`] JSON.
    pub response_path: PathBuf,
    /// Where the program should save the model, if it saves one.
    pub model_path: PathBuf,
}

const LABEL_COLUMN: &str = "label";

/// Trainer that shells out to an external program.
///
/// Each fit gets a scratch directory holding `train.csv`, `eval.csv` and
/// `request.json`. The program is run with the request path as its last
/// argument and must write `response.json`, and optionally `model.bin`.
#[derive(Debug)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
    scratch_root: PathBuf,
    keep_scratch: bool,
    counter: AtomicU64,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            scratch_root: scratch_root.into(),
            keep_scratch: false,
            counter: AtomicU64::new(0),
        }
    }

    /// Build from trainer settings; fails when no command is configured.
    pub fn from_settings(
        settings: &TrainerSettings,
        scratch_root: impl Into<PathBuf>,
    ) -> Result<Self, TrainingError> {
        let program = settings.command.clone().ok_or_else(|| TrainingError::Launch {
            message: "trainer.command is not configured".to_string(),
        })?;
        Ok(Self::new(program, scratch_root).with_args(settings.args.clone()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Leave scratch directories behind for debugging.
    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    fn scratch_dir(&self) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.scratch_root
            .join(format!("fit-{}-{}", std::process::id(), n))
    }

    fn prepare(&self, dir: &Path, request: &FitRequest<'_>) -> Result<PathBuf, TrainingError> {
        let launch = |message: String| TrainingError::Launch { message };

        std::fs::create_dir_all(dir)
            .map_err(|e| launch(format!("cannot create {}: {}", dir.display(), e)))?;
        let train_path = dir.join("train.csv");
        let eval_path = dir.join("eval.csv");
        write_csv_dataset(request.train, LABEL_COLUMN, &train_path)
            .map_err(|e| launch(e.to_string()))?;
        write_csv_dataset(request.eval, LABEL_COLUMN, &eval_path)
            .map_err(|e| launch(e.to_string()))?;

        let doc = CommandRequest {
            params: request.config.clone(),
            use_best_model: request.use_best_model,
            feature_columns: request.train.feature_names().to_vec(),
            label_column: LABEL_COLUMN.to_string(),
            train_path,
            eval_path,
            response_path: dir.join("response.json"),
            model_path: dir.join("model.bin"),
        };
        let request_path = dir.join("request.json");
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| launch(e.to_string()))?;
        std::fs::write(&request_path, bytes).map_err(|e| launch(e.to_string()))?;
        Ok(request_path)
    }

    async fn run(&self, dir: &Path, request: &FitRequest<'_>) -> Result<FitOutput, TrainingError> {
        let request_path = self.prepare(dir, request)?;

        debug!("Running trainer {} {:?}", self.program, request_path);
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&request_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TrainingError::Launch {
                message: format!("{}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(TrainingError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let response = tokio::fs::read(dir.join("response.json"))
            .await
            .map_err(|e| TrainingError::InvalidResponse {
                message: format!("no response.json: {}", e),
            })?;
        let mut fit: FitOutput =
            serde_json::from_slice(&response).map_err(|e| TrainingError::InvalidResponse {
                message: e.to_string(),
            })?;
        fit.check_shape(request.eval.len())?;

        if let Ok(model) = tokio::fs::read(dir.join("model.bin")).await {
            fit.model = model;
        }
        Ok(fit)
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn fit(&self, request: FitRequest<'_>) -> Result<FitOutput, TrainingError> {
        let dir = self.scratch_dir();
        let result = self.run(&dir, &request).await;
        if !self.keep_scratch {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Failed to remove trainer scratch {}: {}", dir.display(), e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::FixedParams;

    fn tiny() -> Dataset {
        Dataset::new(
            vec!["a".into(), "b".into()],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![0, 1],
        )
        .unwrap()
    }

    #[test]
    fn shape_check_catches_bad_rows() {
        let mut out = FitOutput {
            iterations: 10,
            classes: vec![0, 1],
            probabilities: vec![vec![0.5, 0.5], vec![0.2, 0.8]],
            ..Default::default()
        };
        assert!(out.check_shape(2).is_ok());
        assert!(out.check_shape(3).is_err());
        out.probabilities[1] = vec![1.0];
        assert!(out.check_shape(2).is_err());
        out.classes.clear();
        assert!(out.check_shape(2).is_err());
    }

    #[test]
    fn response_without_history_parses() {
        let json = r#"{"iterations": 5, "classes": [0, 1], "probabilities": [[0.1, 0.9]]}"#;
        let out: FitOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.iterations, 5);
        assert!(out.history.learn.is_empty());
        assert!(out.model.is_empty());
    }

    #[test]
    fn missing_command_is_launch_error() {
        let err = CommandTrainer::from_settings(&TrainerSettings::default(), "scratch").unwrap_err();
        assert!(matches!(err, TrainingError::Launch { .. }));
    }

    #[test]
    fn prepare_writes_request_and_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = CommandTrainer::new("true", dir.path());
        let config = Configuration::new(100, 4, 0.1, 1.0, 1.0, &FixedParams::default());
        let data = tiny();
        let request = FitRequest {
            config: &config,
            train: &data,
            eval: &data,
            use_best_model: true,
        };
        let scratch = trainer.scratch_dir();
        let request_path = trainer.prepare(&scratch, &request).unwrap();
        let doc: CommandRequest =
            serde_json::from_slice(&std::fs::read(request_path).unwrap()).unwrap();
        assert_eq!(doc.params, config);
        assert!(doc.use_best_model);
        assert_eq!(doc.feature_columns, vec!["a", "b"]);
        let train_csv = std::fs::read_to_string(doc.train_path).unwrap();
        assert!(train_csv.starts_with("a,b,label\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = CommandTrainer::new("false", dir.path());
        let config = Configuration::new(100, 4, 0.1, 1.0, 1.0, &FixedParams::default());
        let data = tiny();
        let err = trainer
            .fit(FitRequest {
                config: &config,
                train: &data,
                eval: &data,
                use_best_model: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::NonZeroExit { .. }));
        // Scratch is cleaned up.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn program_without_response_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = CommandTrainer::new("true", dir.path());
        let config = Configuration::new(100, 4, 0.1, 1.0, 1.0, &FixedParams::default());
        let data = tiny();
        let err = trainer
            .fit(FitRequest {
                config: &config,
                train: &data,
                eval: &data,
                use_best_model: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::InvalidResponse { .. }));
    }

    #[test]
    fn missing_program_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = CommandTrainer::new("/nonexistent/sweepline-trainer", dir.path());
        let config = Configuration::new(100, 4, 0.1, 1.0, 1.0, &FixedParams::default());
        let data = tiny();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt
            .block_on(trainer.fit(FitRequest {
                config: &config,
                train: &data,
                eval: &data,
                use_best_model: false,
            }))
            .unwrap_err();
        assert!(matches!(err, TrainingError::Launch { .. }));
    }
}
