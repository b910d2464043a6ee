//! Operator commands around a target: inspect it, unpack it, clear its lock.

use crate::{
    archive::ArchivePrimitive,
    bundle::{discover_bundles, Bundle},
    config::lock_path_for,
    process_lock::{self, LockStatus, ProcessLock},
    series::{FileIndexer, SeriesPattern},
    ArchiverError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub pattern: String,
    pub count: usize,
    pub compressed: usize,
    pub first_index: Option<u64>,
    pub last_index: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: String,
    pub series: Vec<SeriesSummary>,
    pub bundles: Vec<Bundle>,
    pub lock: Option<LockStatus>,
}

pub fn status(
    dir: &Path,
    target: &str,
    patterns: &[SeriesPattern],
    indexer: &dyn FileIndexer,
) -> Result<TargetStatus, ArchiverError> {
    let mut series = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let files = indexer.list(pattern)?;
        series.push(SeriesSummary {
            pattern: pattern.glob(),
            count: files.len(),
            compressed: files.iter().filter(|f| f.compressed).count(),
            first_index: files.first().map(|f| f.index),
            last_index: files.last().map(|f| f.index),
        });
    }

    Ok(TargetStatus {
        target: target.to_string(),
        series,
        bundles: discover_bundles(dir, target)?,
        lock: process_lock::inspect(&lock_path_for(dir, target))?,
    })
}

/// Unpack every bundle of `target` back into loose files, under the
/// target's lock. `Ok(None)` when another run holds the lock.
pub fn restore(archiver: &ArchivePrimitive<'_>, target: &str) -> Result<Option<Vec<PathBuf>>, ArchiverError> {
    let dir = archiver.dir();
    let mut lock = ProcessLock::new();
    if !lock.lock(lock_path_for(dir, target), false)? {
        info!("File series archive in progress, not restoring");
        return Ok(None);
    }

    let mut restored = Vec::new();
    for bundle in discover_bundles(dir, target)? {
        restored.extend(archiver.rehydrate(&bundle.name)?);
    }
    info!(files = restored.len(), "Restored {} bundle contents", target);

    lock.unlock()?;
    Ok(Some(restored))
}

/// Remove `target`'s lock marker regardless of holder
pub fn force_unlock(dir: &Path, target: &str) -> Result<bool, ArchiverError> {
    process_lock::force_unlock(&lock_path_for(dir, target))
}
