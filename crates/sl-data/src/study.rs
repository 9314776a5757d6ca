//! Resumable search-algorithm state, keyed by study name.
//!
//! Kept apart from the ledger: the ledger is the operator-facing record of
//! completed trials, the study is the sampler's own history including trials
//! that were pruned or died mid-training.
//!
//! The study file is an append-only log of JSON events, one per line. Writers
//! take the `<study>.lock` file, read any events other processes appended,
//! then append their own, so several sweeps can share one study without
//! reusing trial numbers or losing each other's results.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use sl_types::{Configuration, LedgerError, SweepResult};

use crate::fsutil::{ends_with_newline, ensure_dir, sync_parent, FileLock};

/// Lifecycle of a sampled trial from the search algorithm's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyTrialState {
    Running,
    Complete,
    Pruned,
    Failed,
}

/// One suggestion handed out by the sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyTrial {
    pub number: u64,
    pub params: Configuration,
    pub state: StudyTrialState,
    /// Objective value, set only for completed trials.
    pub value: Option<f64>,
    /// Session that sampled the trial.
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One line of the study log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum StudyEvent {
    Created {
        study_name: String,
        at: DateTime<Utc>,
    },
    Began {
        number: u64,
        params: Configuration,
        owner: String,
        at: DateTime<Utc>,
    },
    Finished {
        number: u64,
        state: StudyTrialState,
        value: Option<f64>,
        at: DateTime<Utc>,
    },
}

/// Tuning for lock contention and orphan detection.
#[derive(Debug, Clone)]
pub struct StudyOptions {
    /// Running trials of other sessions older than this are closed as failed
    /// on open.
    pub orphan_after: Duration,
    pub lock_timeout: StdDuration,
    pub stale_lock_after: Duration,
}

impl Default for StudyOptions {
    fn default() -> Self {
        Self {
            orphan_after: Duration::hours(24),
            lock_timeout: StdDuration::from_secs(30),
            stale_lock_after: Duration::minutes(10),
        }
    }
}

fn session_owner() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_micros(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// File-backed study store.
#[derive(Debug)]
pub struct StudyStore {
    path: PathBuf,
    lock_path: PathBuf,
    options: StudyOptions,
    study_name: String,
    owner: String,
    created_at: Option<DateTime<Utc>>,
    /// Sorted by trial number.
    trials: Vec<StudyTrial>,
    /// Bytes of the log already applied.
    offset: u64,
}

impl StudyStore {
    /// Load the study at `path` with default options, creating it if absent.
    pub fn open<P: AsRef<Path>>(path: P, study_name: &str) -> SweepResult<Self> {
        Self::open_with(path, study_name, StudyOptions::default())
    }

    /// Load the study at `path`, creating it if absent.
    ///
    /// Running trials of other sessions that started more than
    /// `options.orphan_after` ago belonged to a process that died; they are
    /// closed as failed so they never count as observations.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        study_name: &str,
        options: StudyOptions,
    ) -> SweepResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        let mut store = Self {
            path,
            lock_path: PathBuf::from(lock_name),
            options,
            study_name: study_name.to_string(),
            owner: session_owner(),
            created_at: None,
            trials: Vec::new(),
            offset: 0,
        };

        let orphaned = {
            let _lock = store.lock()?;
            store.catch_up()?;
            if store.created_at.is_none() {
                if !store.trials.is_empty() {
                    return Err(LedgerError::StudyCorruption {
                        message: format!("{} has trials but no header event", store.path.display()),
                    }
                    .into());
                }
                store.append_event(StudyEvent::Created {
                    study_name: study_name.to_string(),
                    at: Utc::now(),
                })?;
            }
            store.close_orphaned()?
        };
        if orphaned > 0 {
            warn!("Study {}: closed {} orphaned running trials", study_name, orphaned);
        }
        info!(
            "Opened study {} with {} trials ({} complete)",
            study_name,
            store.trials.len(),
            store.completed().count()
        );
        Ok(store)
    }

    fn lock(&self) -> SweepResult<FileLock> {
        FileLock::acquire(
            &self.lock_path,
            self.options.lock_timeout,
            self.options.stale_lock_after,
        )
    }

    fn close_orphaned(&mut self) -> SweepResult<usize> {
        let now = Utc::now();
        let orphaned: Vec<u64> = self
            .trials
            .iter()
            .filter(|t| {
                t.state == StudyTrialState::Running
                    && t.owner != self.owner
                    && now - t.started_at >= self.options.orphan_after
            })
            .map(|t| t.number)
            .collect();
        for &number in &orphaned {
            self.append_event(StudyEvent::Finished {
                number,
                state: StudyTrialState::Failed,
                value: None,
                at: now,
            })?;
        }
        Ok(orphaned.len())
    }

    /// Apply events appended since the last read. Does not take the lock, so
    /// the view may trail a concurrent writer by one event.
    pub fn refresh(&mut self) -> SweepResult<()> {
        self.catch_up()
    }

    fn catch_up(&mut self) -> SweepResult<()> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            return Err(LedgerError::StudyCorruption {
                message: format!(
                    "{} shrank from {} to {} bytes",
                    self.path.display(),
                    self.offset,
                    len
                ),
            }
            .into());
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)?;
        // A tail without a newline is still being written, or was torn.
        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        for line in buf[..end].split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<StudyEvent>(line) {
                Ok(event) => self.apply(event)?,
                Err(e) => warn!("Skipping unreadable study event in {}: {}", self.path.display(), e),
            }
        }
        self.offset += end as u64 + 1;
        Ok(())
    }

    fn apply(&mut self, event: StudyEvent) -> SweepResult<()> {
        match event {
            StudyEvent::Created { study_name, at } => {
                if study_name != self.study_name {
                    return Err(LedgerError::StudyCorruption {
                        message: format!(
                            "{} holds study {:?}, expected {:?}",
                            self.path.display(),
                            study_name,
                            self.study_name
                        ),
                    }
                    .into());
                }
                self.created_at = Some(at);
            }
            StudyEvent::Began {
                number,
                params,
                owner,
                at,
            } => {
                let pos = self.trials.partition_point(|t| t.number < number);
                if self.trials.get(pos).is_some_and(|t| t.number == number) {
                    warn!("Study {}: trial {} began twice, keeping the first", self.study_name, number);
                    return Ok(());
                }
                self.trials.insert(
                    pos,
                    StudyTrial {
                        number,
                        params,
                        state: StudyTrialState::Running,
                        value: None,
                        owner,
                        started_at: at,
                        finished_at: None,
                    },
                );
            }
            StudyEvent::Finished {
                number,
                state,
                value,
                at,
            } => match self.trial_mut(number) {
                Some(trial) => {
                    trial.state = state;
                    trial.value = value;
                    trial.finished_at = Some(at);
                }
                None => warn!("Study {}: finish for unknown trial {}", self.study_name, number),
            },
        }
        Ok(())
    }

    /// Durably append one event. Callers hold the lock and have caught up.
    fn append_event(&mut self, event: StudyEvent) -> SweepResult<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();
        let mut out = Vec::with_capacity(line.len() + 1);
        if len > 0 && !ends_with_newline(&mut file, len)? {
            warn!("Discarding torn study event at the end of {}", self.path.display());
            out.push(b'\n');
        }
        out.extend_from_slice(&line);
        file.write_all(&out)?;
        file.sync_all()?;
        if len == 0 {
            sync_parent(&self.path);
        }

        self.offset = len + out.len() as u64;
        self.apply(event)
    }

    pub fn study_name(&self) -> &str {
        &self.study_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity this store writes into the trials it begins.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn trials(&self) -> &[StudyTrial] {
        &self.trials
    }

    pub fn trial(&self, number: u64) -> Option<&StudyTrial> {
        self.trials
            .binary_search_by_key(&number, |t| t.number)
            .ok()
            .map(|i| &self.trials[i])
    }

    fn trial_mut(&mut self, number: u64) -> Option<&mut StudyTrial> {
        self.trials
            .binary_search_by_key(&number, |t| t.number)
            .ok()
            .map(|i| &mut self.trials[i])
    }

    /// Completed trials as `(number, params, value)`.
    pub fn completed(&self) -> impl Iterator<Item = (u64, &Configuration, f64)> + '_ {
        self.trials
            .iter()
            .filter(|t| t.state == StudyTrialState::Complete)
            .filter_map(|t| t.value.map(|v| (t.number, &t.params, v)))
    }

    /// Register a freshly sampled configuration as running.
    pub fn begin_trial(&mut self, params: Configuration) -> SweepResult<u64> {
        let _lock = self.lock()?;
        self.catch_up()?;
        let number = self.trials.last().map_or(0, |t| t.number + 1);
        self.append_event(StudyEvent::Began {
            number,
            params,
            owner: self.owner.clone(),
            at: Utc::now(),
        })?;
        debug!("Study {}: began trial {}", self.study_name, number);
        Ok(number)
    }

    pub fn complete(&mut self, number: u64, value: f64) -> SweepResult<()> {
        self.finish(number, StudyTrialState::Complete, Some(value))
    }

    pub fn prune(&mut self, number: u64) -> SweepResult<()> {
        self.finish(number, StudyTrialState::Pruned, None)
    }

    pub fn fail(&mut self, number: u64) -> SweepResult<()> {
        self.finish(number, StudyTrialState::Failed, None)
    }

    fn finish(&mut self, number: u64, state: StudyTrialState, value: Option<f64>) -> SweepResult<()> {
        let _lock = self.lock()?;
        self.catch_up()?;
        if self.trial(number).is_none() {
            return Err(LedgerError::UnknownStudyTrial { number }.into());
        }
        self.append_event(StudyEvent::Finished {
            number,
            state,
            value,
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_types::FixedParams;
    use tempfile::tempdir;

    fn config(depth: u32) -> Configuration {
        Configuration::new(200, depth, 0.1, 1.0, 1.0, &FixedParams::default())
    }

    #[test]
    fn new_study_is_created_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catboost_sweep.study.jsonl");
        let store = StudyStore::open(&path, "catboost_sweep").unwrap();
        assert!(path.exists());
        assert_eq!(store.study_name(), "catboost_sweep");
        assert!(store.trials().is_empty());
        // Reopening must not write a second header.
        drop(store);
        StudyStore::open(&path, "catboost_sweep").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn trial_states_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        {
            let mut store = StudyStore::open(&path, "s").unwrap();
            let a = store.begin_trial(config(4)).unwrap();
            let b = store.begin_trial(config(5)).unwrap();
            let c = store.begin_trial(config(6)).unwrap();
            assert_eq!((a, b, c), (0, 1, 2));
            store.complete(a, 0.7).unwrap();
            store.prune(b).unwrap();
            store.fail(c).unwrap();
        }
        let store = StudyStore::open(&path, "s").unwrap();
        let states: Vec<StudyTrialState> = store.trials().iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                StudyTrialState::Complete,
                StudyTrialState::Pruned,
                StudyTrialState::Failed
            ]
        );
        let completed: Vec<(u64, f64)> = store.completed().map(|(n, _, v)| (n, v)).collect();
        assert_eq!(completed, vec![(0, 0.7)]);
        assert_eq!(store.trial(1).unwrap().params.depth, 5);
    }

    #[test]
    fn two_stores_share_one_study() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        let mut first = StudyStore::open(&path, "s").unwrap();
        let mut second = StudyStore::open(&path, "s").unwrap();

        let a = first.begin_trial(config(4)).unwrap();
        let b = second.begin_trial(config(5)).unwrap();
        assert_ne!(a, b);
        first.complete(a, 0.7).unwrap();
        second.complete(b, 0.8).unwrap();

        let reopened = StudyStore::open(&path, "s").unwrap();
        let mut values: Vec<f64> = reopened.completed().map(|(_, _, v)| v).collect();
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![0.7, 0.8]);

        first.refresh().unwrap();
        assert_eq!(first.completed().count(), 2);
    }

    #[test]
    fn opening_a_second_session_keeps_live_trials_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        let mut first = StudyStore::open(&path, "s").unwrap();
        let number = first.begin_trial(config(4)).unwrap();

        let second = StudyStore::open(&path, "s").unwrap();
        assert_eq!(second.trial(number).unwrap().state, StudyTrialState::Running);
        first.complete(number, 0.5).unwrap();
        assert_eq!(first.trial(number).unwrap().state, StudyTrialState::Complete);
    }

    #[test]
    fn stale_running_trials_are_failed_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        {
            let mut store = StudyStore::open(&path, "s").unwrap();
            store.begin_trial(config(4)).unwrap();
        }
        let options = StudyOptions {
            orphan_after: Duration::zero(),
            ..StudyOptions::default()
        };
        let mut store = StudyStore::open_with(&path, "s", options).unwrap();
        assert_eq!(store.trial(0).unwrap().state, StudyTrialState::Failed);
        assert_eq!(store.begin_trial(config(5)).unwrap(), 1);
    }

    #[test]
    fn torn_event_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        {
            let mut store = StudyStore::open(&path, "s").unwrap();
            store.begin_trial(config(4)).unwrap();
        }
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"event\":\"began\",\"number\":1,\"par").unwrap();
        drop(file);

        let mut store = StudyStore::open(&path, "s").unwrap();
        assert_eq!(store.trials().len(), 1);
        assert_eq!(store.begin_trial(config(5)).unwrap(), 1);

        let reopened = StudyStore::open(&path, "s").unwrap();
        assert_eq!(reopened.trials().len(), 2);
        assert_eq!(reopened.trial(1).unwrap().params.depth, 5);
    }

    #[test]
    fn study_name_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        StudyStore::open(&path, "alpha").unwrap();
        assert!(StudyStore::open(&path, "beta").is_err());
    }

    #[test]
    fn unknown_trial_number_is_an_error() {
        let dir = tempdir().unwrap();
        let mut store = StudyStore::open(dir.path().join("s.jsonl"), "s").unwrap();
        assert!(store.complete(42, 1.0).is_err());
    }
}
