use crate::{
    archive::{ArchiveBackend, ArchivePrimitive},
    bundle::{discover_bundles, production_bucket, Bundle, BundleTier},
    compression::Compressor,
    config::RollingConfig,
    process_lock::ProcessLock,
    pruner::{PruneReport, RetentionPruner, RetentionWindow},
    series::{FileIndexer, SeriesFile, SeriesPattern},
    ArchiverError,
};
use itertools::Itertools;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Locked,
    Reconciling,
    Evicting,
    Pruning,
    ArchivingCoarse,
    ArchivingProduction,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Locked => "locked",
            Phase::Reconciling => "reconciling",
            Phase::Evicting => "evicting",
            Phase::Pruning => "pruning",
            Phase::ArchivingCoarse => "archiving-coarse",
            Phase::ArchivingProduction => "archiving-production",
            Phase::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NothingToArchive,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub latest_index: u64,
    pub window: RetentionWindow,
    pub production_bucket: u64,
    /// Bundles rebuilt because their compression mode changed
    pub reconciled: Vec<PathBuf>,
    /// Production bundles the window slid past
    pub evicted: Vec<PathBuf>,
    pub decompressed_loose: usize,
    pub pruned: PruneReport,
    pub archived_coarse: usize,
    pub archived_production: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunReport),
    Skipped { reason: SkipReason },
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Skipped { .. } => None,
        }
    }
}

/// Drives one rolling archival run over a target:
/// lock, reconcile, evict, prune, archive coarse, archive production, unlock.
///
/// Any failure after the lock is taken returns early and leaves the marker
/// in place for an operator to inspect.
pub struct RollingOrchestrator<'a> {
    config: &'a RollingConfig,
    indexer: &'a dyn FileIndexer,
    pruner: &'a dyn RetentionPruner,
    compressor: &'a dyn Compressor,
    archiver: ArchivePrimitive<'a>,
    phase: Phase,
}

impl<'a> RollingOrchestrator<'a> {
    pub fn new(
        config: &'a RollingConfig,
        indexer: &'a dyn FileIndexer,
        pruner: &'a dyn RetentionPruner,
        backend: &'a dyn ArchiveBackend,
        compressor: &'a dyn Compressor,
    ) -> Self {
        Self {
            config,
            indexer,
            pruner,
            compressor,
            archiver: ArchivePrimitive::new(&config.work_dir, backend, compressor, indexer),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(target_name = %self.config.target, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    pub fn run(&mut self) -> Result<RunOutcome, ArchiverError> {
        self.enter(Phase::Idle);
        let patterns = self.config.patterns();
        let first = patterns
            .first()
            .cloned()
            .ok_or_else(|| ArchiverError::Config("no file series headers configured".to_string()))?;

        let loose = self.indexer.list_all(&patterns)?;
        if loose.is_empty() {
            info!(
                "No `{}` files to archive, skipping",
                patterns.iter().map(SeriesPattern::glob).join(" ")
            );
            return Ok(RunOutcome::Skipped {
                reason: SkipReason::NothingToArchive,
            });
        }

        let latest_index = match self.config.latest_index {
            Some(index) => index,
            None => self.indexer.latest_index(&first)?.ok_or_else(|| {
                ArchiverError::Config(format!(
                    "no `{}` files to infer the latest index from; pass --ilastsave",
                    first.glob()
                ))
            })?,
        };

        let lock_path = self.config.lock_path();
        let mut lock = ProcessLock::new();
        if !lock.lock(&lock_path, false)? {
            info!("File series archive already in progress, skipping to avoid duplication errors");
            return Ok(RunOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            });
        }
        self.enter(Phase::Locked);

        let report = match self.run_locked(&patterns, latest_index) {
            Ok(report) => report,
            Err(e) => {
                error!(
                    phase = %self.phase,
                    lockfile = %lock_path.display(),
                    "Archive run aborted; lock left in place for inspection: {}",
                    e
                );
                return Err(e);
            }
        };

        self.enter(Phase::Done);
        lock.unlock()?;
        info!("Done");
        Ok(RunOutcome::Completed(report))
    }

    fn run_locked(&mut self, patterns: &[SeriesPattern], latest_index: u64) -> Result<RunReport, ArchiverError> {
        let config = self.config;
        let mode = config.compression;

        self.enter(Phase::Reconciling);
        let mut reconciled = Vec::new();
        for bundle in discover_bundles(&config.work_dir, &config.target)? {
            if bundle.mode != mode {
                info!(
                    bundle = %bundle.name.display(),
                    "{} will be converted to .{}",
                    bundle.name.display(),
                    mode.bundle_extension()
                );
                self.archiver.rehydrate(&bundle.name)?;
                reconciled.push(bundle.name);
            }
        }
        let decompressed_loose = if mode.is_compressed() {
            0
        } else {
            // Left compressed by an interrupted earlier run
            let stray: Vec<PathBuf> = self
                .indexer
                .list_all(patterns)?
                .into_iter()
                .filter(|f| f.compressed)
                .map(|f| f.name)
                .collect();
            self.compressor.decompress(&config.work_dir, &stray)?;
            stray.len()
        };

        let window = RetentionWindow::new(
            config.save_series_start,
            config.production_interval,
            config.coarse_save_freq,
            latest_index,
        );

        self.enter(Phase::Evicting);
        let mut evicted = Vec::new();
        for bundle in self.expired_production_bundles(&window)? {
            info!(
                bundle = %bundle.name.display(),
                "{} is outside production interval, unpacking to be coarsened",
                bundle.name.display()
            );
            self.archiver.rehydrate(&bundle.name)?;
            evicted.push(bundle.name);
        }

        self.enter(Phase::Pruning);
        info!(
            save_series_start = window.save_series_start,
            production_window_start = window.production_window_start,
            coarse_save_freq = window.coarse_save_freq,
            "Cleaning up rolling window"
        );
        let pruned = self.pruner.prune(&config.work_dir, patterns, &window)?;

        self.enter(Phase::ArchivingCoarse);
        let coarse: Vec<SeriesFile> = self
            .indexer
            .list_all(patterns)?
            .into_iter()
            .filter(|f| f.index < window.production_window_start)
            .collect();
        let archived_coarse = if coarse.is_empty() {
            0
        } else {
            info!(files = coarse.len(), "Archiving coarse interval");
            self.archiver.archive_files(&coarse, &config.coarse_stem(), mode)?
        };

        self.enter(Phase::ArchivingProduction);
        let bucket = production_bucket(latest_index, config.production_interval);
        let remaining = self.indexer.list_all(patterns)?;
        let archived_production = if remaining.is_empty() {
            0
        } else {
            info!(files = remaining.len(), bucket, "Archiving production interval");
            self.archiver
                .archive_files(&remaining, &config.production_stem(bucket), mode)?
        };

        Ok(RunReport {
            latest_index,
            window,
            production_bucket: bucket,
            reconciled,
            evicted,
            decompressed_loose,
            pruned,
            archived_coarse,
            archived_production,
        })
    }

    fn expired_production_bundles(&self, window: &RetentionWindow) -> Result<Vec<Bundle>, ArchiverError> {
        let interval = self.config.production_interval;
        Ok(discover_bundles(&self.config.work_dir, &self.config.target)?
            .into_iter()
            .filter(|b| match b.tier {
                BundleTier::Production { bucket } => bucket.saturating_add(interval) <= window.production_window_start,
                BundleTier::Coarse => false,
            })
            .collect())
    }
}
