//! Durable file primitives shared by the ledger, study store and artifacts.

use chrono::{Duration, Utc};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant, SystemTime};
use tracing::warn;

use sl_types::{LedgerError, SweepResult};

pub(crate) fn ensure_dir(path: &Path) -> SweepResult<()> {
    if !path.as_os_str().is_empty() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write `bytes` to `path` via a synced temp file and rename.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> SweepResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    sync_parent(path);
    Ok(())
}

/// Whether a non-empty file's last byte is a newline.
pub(crate) fn ends_with_newline(file: &mut fs::File, len: u64) -> SweepResult<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

pub(crate) fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// Exclusive advisory lock held by the existence of a file.
///
/// Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Spin until the lock file can be created, breaking locks whose file is
    /// older than `stale_after`.
    pub fn acquire(path: &Path, timeout: StdDuration, stale_after: Duration) -> SweepResult<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    let payload = format!(
                        "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                        std::process::id(),
                        Utc::now().to_rfc3339()
                    );
                    let _ = file.write_all(payload.as_bytes());
                    let _ = file.sync_all();
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(path, stale_after) {
                        warn!("Breaking stale lock {}", path.display());
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(LedgerError::LockTimeout {
                            path: path.display().to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        }
                        .into());
                    }
                    std::thread::sleep(StdDuration::from_millis(25));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        match stale_after.to_std() {
            Ok(limit) => age > limit,
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.lock");
        let held = FileLock::acquire(&path, StdDuration::from_millis(50), Duration::hours(1)).unwrap();
        assert!(path.exists());

        let contended = FileLock::acquire(&path, StdDuration::from_millis(60), Duration::hours(1));
        assert!(matches!(
            contended,
            Err(sl_types::SweepError::Ledger(LedgerError::LockTimeout { .. }))
        ));

        drop(held);
        assert!(!path.exists());
        assert!(FileLock::acquire(&path, StdDuration::from_millis(50), Duration::hours(1)).is_ok());
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.lock");
        fs::write(&path, b"{}").unwrap();
        std::thread::sleep(StdDuration::from_millis(20));
        let lock = FileLock::acquire(&path, StdDuration::from_millis(50), Duration::milliseconds(1));
        assert!(lock.is_ok());
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        atomic_write_bytes(&path, b"first").unwrap();
        atomic_write_bytes(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
