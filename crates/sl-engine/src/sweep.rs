//! The sweep control loop.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use sl_data::{AppendOutcome, ArtifactStore, SweepStorage, TrialLedger};
use sl_monitor::{dispatch, HeartbeatReporter, Notifier, SweepAlert, SweepAlertKind};
use sl_optimizer::ConfigSampler;
use sl_types::{Dataset, PruneReason, SweepConfig, SweepResult, TrialOutcome, TrialRecord};

use crate::executor::TrialExecutor;
use crate::trainer::Trainer;

/// Cooperative stop flag, checked at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Flip the flag on the first Ctrl-C.
    pub fn install_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received; stopping after the current trial");
                    signal.stop();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }
}

/// Mutable loop state owned by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepState {
    /// Best score seen, seeded from the ledger. `None` until a trial completes.
    pub best_score: Option<f64>,
    pub last_heartbeat: DateTime<Utc>,
    /// Index given to the next completed trial.
    pub trial_index: u64,
    /// Sampler suggestions consumed, counted against `max_trials`.
    pub suggested: usize,
    pub completed: usize,
    pub pruned: usize,
}

impl SweepState {
    pub fn new(best_score: Option<f64>, now: DateTime<Utc>) -> Self {
        Self {
            best_score,
            last_heartbeat: now,
            trial_index: 0,
            suggested: 0,
            completed: 0,
            pruned: 0,
        }
    }

    /// Best score for log lines.
    pub fn describe_best(&self) -> String {
        match self.best_score {
            Some(best) => format!("{:.4}", best),
            None => "none".to_string(),
        }
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepExit {
    Finished,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSummary {
    pub exit: SweepExit,
    pub state: SweepState,
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Recorded { trial_index: u64, score: f64 },
    Pruned(PruneReason),
}

/// Drives sampler, executor, ledger and heartbeat until stopped or the
/// trial budget runs out.
pub struct SweepController {
    max_trials: usize,
    ledger: TrialLedger,
    artifacts: ArtifactStore,
    sampler: ConfigSampler,
    executor: TrialExecutor,
    heartbeat: HeartbeatReporter,
    notifier: Arc<dyn Notifier>,
    stop: StopSignal,
    state: SweepState,
}

impl SweepController {
    pub fn new(
        config: &SweepConfig,
        storage: SweepStorage,
        trainer: Arc<dyn Trainer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let SweepStorage {
            ledger,
            study,
            artifacts,
        } = storage;
        let sampler = ConfigSampler::tpe(study, config.trainer.fixed_params(), config.seed);
        let heartbeat = HeartbeatReporter::new(
            config.heartbeat_interval(),
            config.heartbeat_window(),
            config.heartbeat_plot_path(),
        );
        let state = SweepState::new(ledger.max_score(), Utc::now());

        Self {
            max_trials: config.max_trials,
            ledger,
            artifacts,
            sampler,
            executor: TrialExecutor::new(trainer, notifier.clone()),
            heartbeat,
            notifier,
            stop: StopSignal::new(),
            state,
        }
    }

    pub fn with_sampler(mut self, sampler: ConfigSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatReporter) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    pub fn ledger(&self) -> &TrialLedger {
        &self.ledger
    }

    pub fn sampler(&self) -> &ConfigSampler {
        &self.sampler
    }

    /// Run the sweep to completion.
    ///
    /// Exactly one lifecycle notification is sent: finished, interrupted, or
    /// crashed. A crash is returned as the error after notifying.
    pub async fn run(&mut self, train: &Dataset, val: &Dataset) -> SweepResult<SweepSummary> {
        info!(
            "Starting sweep: budget {} trials, sampler {}, best so far {}",
            self.max_trials,
            self.sampler.strategy_name(),
            self.state.describe_best()
        );

        match self.run_loop(train, val).await {
            Ok(exit) => {
                let kind = match exit {
                    SweepExit::Finished => SweepAlertKind::Finished {
                        best_score: self.state.best_score,
                    },
                    SweepExit::Interrupted => SweepAlertKind::Interrupted {
                        best_score: self.state.best_score,
                    },
                };
                info!(
                    "Sweep {:?}: {} recorded, {} pruned, best {}",
                    exit,
                    self.state.completed,
                    self.state.pruned,
                    self.state.describe_best()
                );
                dispatch(self.notifier.as_ref(), &SweepAlert::new(kind)).await;
                Ok(SweepSummary {
                    exit,
                    state: self.state.clone(),
                })
            }
            Err(e) => {
                error!("Sweep crashed: {}", e);
                let report = e.to_string();
                dispatch(
                    self.notifier.as_ref(),
                    &SweepAlert::new(SweepAlertKind::Crashed { report }),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, train: &Dataset, val: &Dataset) -> SweepResult<SweepExit> {
        while self.state.suggested < self.max_trials {
            if self.stop.is_stopped() {
                return Ok(SweepExit::Interrupted);
            }
            self.step(train, val).await?;
        }
        Ok(SweepExit::Finished)
    }

    /// One iteration: suggest, dedupe, execute, record, heartbeat.
    pub async fn step(&mut self, train: &Dataset, val: &Dataset) -> SweepResult<StepResult> {
        let trial = self.sampler.suggest()?;
        self.state.suggested += 1;
        let key = trial.config.canonical_key()?;

        if self.ledger.contains(&key) {
            return self.prune(trial.number, PruneReason::Duplicate);
        }

        let trial_index = self.state.trial_index;
        match self
            .executor
            .execute(trial_index, &trial.config, train, val)
            .await
        {
            TrialOutcome::Completed(metrics) => {
                let now = Utc::now();
                let record = TrialRecord::new(trial_index, key, &metrics, now);
                if self.ledger.append(record)? == AppendOutcome::Duplicate {
                    // Another sweep recorded it while we trained.
                    return self.prune(trial.number, PruneReason::Duplicate);
                }
                self.sampler.tell(trial.number, metrics.score)?;
                self.artifacts
                    .write_config(trial_index, &trial.config, now, metrics.score)?;

                if self.state.best_score.map_or(true, |best| metrics.score > best) {
                    self.state.best_score = Some(metrics.score);
                }
                self.state.trial_index += 1;
                self.state.completed += 1;
                info!(
                    "Trial {} recorded: score {:.4} (acc {:.4}, f1 {:.4}, loss {:.4}, {:.1}s, {} iters), best {}",
                    trial_index,
                    metrics.score,
                    metrics.accuracy,
                    metrics.f1,
                    metrics.log_loss,
                    metrics.duration_seconds,
                    metrics.iterations,
                    self.state.describe_best()
                );

                self.poll_heartbeat(now).await?;
                Ok(StepResult::Recorded {
                    trial_index,
                    score: metrics.score,
                })
            }
            TrialOutcome::Pruned(reason) => self.prune(trial.number, reason),
            TrialOutcome::Failed(e) => {
                if let Err(study_err) = self.sampler.fail(trial.number) {
                    warn!(
                        "Could not mark study trial {} failed: {}",
                        trial.number, study_err
                    );
                }
                Err(e)
            }
        }
    }

    fn prune(&mut self, number: u64, reason: PruneReason) -> SweepResult<StepResult> {
        warn!("Study trial {} pruned: {}", number, reason);
        self.sampler.prune(number, &reason)?;
        self.state.pruned += 1;
        Ok(StepResult::Pruned(reason))
    }

    async fn poll_heartbeat(&mut self, now: DateTime<Utc>) -> SweepResult<()> {
        if !self.heartbeat.is_due(self.state.last_heartbeat, now) {
            return Ok(());
        }
        // Pick up rows other sweeps appended.
        self.ledger.load()?;
        let recent = self.ledger.recent(now, self.heartbeat.window());
        let report = self
            .heartbeat
            .report(&recent, self.state.best_score, now, self.notifier.as_ref())
            .await;
        debug!("Heartbeat delivered: {}", report.delivered);
        self.state.last_heartbeat = now;
        Ok(())
    }
}

impl std::fmt::Debug for SweepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepController")
            .field("max_trials", &self.max_trials)
            .field("ledger", &self.ledger.path())
            .field("state", &self.state)
            .finish()
    }
}
