//! Append-only trial ledger backed by a human-readable CSV file.
//!
//! Every row is a completed trial. The ledger is the single source of truth
//! for deduplication and for resuming the best-known score after a restart:
//!
//! - appends are serialized across processes by a lock file,
//! - the file is re-read under the lock before each append, so a configuration
//!   is only rejected as a duplicate if its row is already durable,
//! - a row is synced to disk before [`TrialLedger::append`] returns,
//! - a torn line left by a crash is skipped on load instead of poisoning the file.

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use sl_types::{Configuration, LedgerError, SweepResult, TrialRecord};

use crate::fsutil::{ensure_dir, ends_with_newline, sync_parent, FileLock};

/// Column order of the ledger file.
pub const LEDGER_COLUMNS: [&str; 8] = [
    "trial",
    "config_hash",
    "score",
    "accuracy",
    "f1",
    "log_loss",
    "duration",
    "timestamp",
];

/// Whether an append wrote a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A row with the same configuration key was already durable.
    Duplicate,
}

/// On-disk row layout.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    trial: u64,
    config_hash: String,
    score: f64,
    accuracy: f64,
    f1: f64,
    log_loss: f64,
    duration: f64,
    timestamp: String,
}

impl From<&TrialRecord> for LedgerRow {
    fn from(record: &TrialRecord) -> Self {
        Self {
            trial: record.trial_index,
            config_hash: record.config_key.clone(),
            score: record.score,
            accuracy: record.accuracy,
            f1: record.f1,
            log_loss: record.loss,
            duration: record.duration_seconds,
            timestamp: record.timestamp.to_rfc3339(),
        }
    }
}

impl LedgerRow {
    fn into_record(self) -> Result<TrialRecord, String> {
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| format!("unparsable timestamp {:?}", self.timestamp))?;
        Ok(TrialRecord {
            trial_index: self.trial,
            config_key: Configuration::normalize_key(&self.config_hash),
            score: self.score,
            accuracy: self.accuracy,
            f1: self.f1,
            loss: self.log_loss,
            duration_seconds: self.duration,
            timestamp,
        })
    }
}

/// Accepts RFC 3339 and the naive local-time layouts older ledgers used.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Durable, append-only table of completed trials.
#[derive(Debug)]
pub struct TrialLedger {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: StdDuration,
    stale_lock_after: Duration,
    records: Vec<TrialRecord>,
    keys: HashSet<String>,
}

impl TrialLedger {
    /// Open (and load) the ledger at `path`. A missing file is an empty ledger.
    pub fn open<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        let mut ledger = Self {
            path,
            lock_path: PathBuf::from(lock_name),
            lock_timeout: StdDuration::from_secs(30),
            stale_lock_after: Duration::minutes(10),
            records: Vec::new(),
            keys: HashSet::new(),
        };
        ledger.load()?;
        Ok(ledger)
    }

    pub fn with_lock_timeout(mut self, timeout: StdDuration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory snapshot.
    pub fn load(&mut self) -> SweepResult<&[TrialRecord]> {
        self.records = Self::read_records(&self.path)?;
        self.keys = self.records.iter().map(|r| r.config_key.clone()).collect();
        Ok(&self.records)
    }

    /// Parse every intact row of the ledger file at `path`.
    pub fn read_records(path: &Path) -> SweepResult<Vec<TrialRecord>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = text.lines().enumerate();
        match lines.next() {
            None => return Ok(Vec::new()),
            Some((_, header)) => {
                let columns: Vec<&str> = header.split(',').map(str::trim).collect();
                if columns != LEDGER_COLUMNS {
                    return Err(LedgerError::InvalidHeader {
                        path: path.display().to_string(),
                        header: header.to_string(),
                    }
                    .into());
                }
            }
        }

        let mut records = Vec::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            // Rows never contain raw newlines, so each line parses in isolation
            // and a torn line cannot bleed into its neighbours.
            match Self::parse_line(line) {
                Ok(record) => records.push(record),
                Err(message) => {
                    let err = LedgerError::InvalidRecord {
                        line: idx as u64 + 1,
                        message,
                    };
                    warn!("Skipping ledger row in {}: {}", path.display(), err);
                }
            }
        }
        Ok(records)
    }

    fn parse_line(line: &str) -> Result<TrialRecord, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let row: LedgerRow = reader
            .deserialize()
            .next()
            .ok_or_else(|| "empty row".to_string())?
            .map_err(|e| e.to_string())?;
        row.into_record()
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `config_key` is present in the latest loaded snapshot.
    pub fn contains(&self, config_key: &str) -> bool {
        self.keys.contains(config_key)
    }

    /// Durably append `record` unless its key is already recorded.
    pub fn append(&mut self, record: TrialRecord) -> SweepResult<AppendOutcome> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout, self.stale_lock_after)?;

        // Another process may have appended since our last read.
        self.load()?;
        if self.contains(&record.config_key) {
            debug!("Ledger already holds {}", record.config_key);
            return Ok(AppendOutcome::Duplicate);
        }

        let mut buf = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            writer
                .serialize(LedgerRow::from(&record))
                .map_err(|e| LedgerError::WriteFailed {
                    message: e.to_string(),
                })?;
            writer.flush()?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();
        let mut out = Vec::with_capacity(buf.len() + 64);
        if len == 0 {
            out.extend_from_slice(LEDGER_COLUMNS.join(",").as_bytes());
            out.push(b'\n');
        } else if !ends_with_newline(&mut file, len)? {
            out.push(b'\n');
        }
        out.extend_from_slice(&buf);
        file.write_all(&out)?;
        file.sync_all()?;
        if len == 0 {
            sync_parent(&self.path);
        }

        self.keys.insert(record.config_key.clone());
        self.records.push(record);
        Ok(AppendOutcome::Appended)
    }

    /// Highest-scoring record; ties go to the earliest timestamp.
    pub fn best(&self) -> Option<&TrialRecord> {
        self.records.iter().max_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        })
    }

    pub fn max_score(&self) -> Option<f64> {
        self.best().map(|r| r.score)
    }

    /// The `k` best records, score descending.
    pub fn top_k(&self, k: usize) -> Vec<&TrialRecord> {
        let mut ranked: Vec<&TrialRecord> = self.records.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        ranked.truncate(k);
        ranked
    }

    /// Records completed strictly after `now - window`, oldest first.
    pub fn recent(&self, now: DateTime<Utc>, window: Duration) -> Vec<&TrialRecord> {
        let cutoff = now - window;
        let mut recent: Vec<&TrialRecord> = self
            .records
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .collect();
        recent.sort_by_key(|r| r.timestamp);
        recent
    }
}
