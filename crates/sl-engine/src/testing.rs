//! In-process fakes shared by the engine tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sl_monitor::{Notifier, NotifyError, NotifyResult};
use sl_types::{Configuration, Dataset, TrainingError};

use crate::trainer::{EvalHistory, FitOutput, FitRequest, Trainer};

/// Three features, labels 0..=2 in train; val adds an unseen label 9.
pub fn datasets() -> (Dataset, Dataset) {
    let names = vec!["f0".to_string(), "f1".to_string(), "f2".to_string()];
    let train = Dataset::new(
        names.clone(),
        (0..6).map(|i| vec![i as f64, 1.0, 0.5]).collect(),
        vec![0, 1, 2, 0, 1, 2],
    )
    .unwrap();
    let val = Dataset::new(
        names,
        (0..5).map(|i| vec![i as f64, 0.0, 1.0]).collect(),
        vec![0, 1, 2, 9, 1],
    )
    .unwrap();
    (train, val)
}

/// Trainer that predicts the true label with probability 0.8, or fails for
/// configurations matching `fail_when`.
pub struct FakeTrainer {
    pub calls: AtomicUsize,
    pub eval_sizes: Mutex<Vec<usize>>,
    pub seen: Mutex<Vec<Configuration>>,
    fail_when: Box<dyn Fn(&Configuration) -> bool + Send + Sync>,
}

impl FakeTrainer {
    pub fn ok() -> Self {
        Self::failing_when(|_| false)
    }

    pub fn failing_when(f: impl Fn(&Configuration) -> bool + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            eval_sizes: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            fail_when: Box::new(f),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trainer for FakeTrainer {
    async fn fit(&self, request: FitRequest<'_>) -> Result<FitOutput, TrainingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.eval_sizes.lock().unwrap().push(request.eval.len());
        self.seen.lock().unwrap().push(request.config.clone());
        if (self.fail_when)(request.config) {
            return Err(TrainingError::Failed {
                message: "CUDA error: out of memory".to_string(),
            });
        }

        let classes: Vec<i64> = request.train.label_set().into_iter().collect();
        let probabilities = request
            .eval
            .labels()
            .iter()
            .map(|label| {
                classes
                    .iter()
                    .map(|c| {
                        if c == label {
                            0.8
                        } else {
                            0.2 / (classes.len() - 1) as f64
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(FitOutput {
            iterations: request.config.iterations as usize / 2,
            classes,
            probabilities,
            history: EvalHistory {
                metric: request.config.eval_metric.clone(),
                learn: vec![1.0, 0.8, 0.6],
                validation: vec![1.1, 0.9, 0.8],
            },
            model: b"model-bytes".to_vec(),
        })
    }
}

/// Notifier that records every message, optionally failing delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String, bool)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(s, _, _)| s.clone()).collect()
    }

    pub fn count(&self, subject: &str) -> usize {
        self.subjects().iter().filter(|s| *s == subject).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str, image: Option<&Path>) -> NotifyResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string(), image.is_some()));
        if self.fail {
            return Err(NotifyError::Api {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}
