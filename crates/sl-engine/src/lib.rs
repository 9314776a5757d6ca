//! Sweepline engine: runs trials, drives the sweep loop and retrains the
//! best configurations.

pub mod executor;
pub mod metrics;
pub mod sweep;
pub mod topk;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use executor::TrialExecutor;
pub use metrics::{ClassificationReport, RankingMetrics};
pub use sweep::{StepResult, StopSignal, SweepController, SweepExit, SweepState, SweepSummary};
pub use topk::{ModelReport, TopKRetrainer, TopKSummary};
pub use trainer::{CommandTrainer, EvalHistory, FitOutput, FitRequest, Trainer};
