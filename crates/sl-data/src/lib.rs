pub mod artifacts;
pub mod fsutil;
pub mod ledger;
pub mod loaders;
pub mod study;

pub use artifacts::*;
pub use fsutil::FileLock;
pub use ledger::*;
pub use loaders::*;
pub use study::*;

use sl_types::{SweepConfig, SweepResult};

/// Everything a sweep persists, opened from one configuration.
#[derive(Debug)]
pub struct SweepStorage {
    pub ledger: ledger::TrialLedger,
    pub study: study::StudyStore,
    pub artifacts: artifacts::ArtifactStore,
}

impl SweepStorage {
    pub fn open(config: &SweepConfig) -> SweepResult<Self> {
        let artifacts = artifacts::ArtifactStore::new(&config.results_dir)?;
        let ledger = ledger::TrialLedger::open(config.ledger_path())?
            .with_stale_lock_after(config.lock_stale_after());
        let study = study::StudyStore::open_with(
            config.study_path(),
            &config.study_name,
            study::StudyOptions {
                orphan_after: config.study_orphan_after(),
                stale_lock_after: config.lock_stale_after(),
                ..study::StudyOptions::default()
            },
        )?;

        tracing::info!(
            "Opened sweep storage in {} ({} ledger rows)",
            config.results_dir.display(),
            ledger.len()
        );

        Ok(Self {
            ledger,
            study,
            artifacts,
        })
    }
}
