use crate::{
    series::{FileIndexer, SeriesFile, SeriesPattern},
    ArchiverError,
};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Index ranges of the rolling retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionWindow {
    pub save_series_start: u64,
    pub production_window_start: u64,
    pub coarse_save_freq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Below `save_series_start`
    Expired,
    /// In the coarse range but off the sampling stride
    Thinned,
    Keep,
}

impl RetentionWindow {
    pub fn new(save_series_start: u64, production_interval: u64, coarse_save_freq: u64, latest_index: u64) -> Self {
        Self {
            save_series_start,
            production_window_start: latest_index.saturating_sub(production_interval),
            coarse_save_freq: coarse_save_freq.max(1),
        }
    }

    pub fn disposition(&self, index: u64) -> Disposition {
        if index < self.save_series_start {
            Disposition::Expired
        } else if index < self.production_window_start && index % self.coarse_save_freq != 0 {
            Disposition::Thinned
        } else {
            Disposition::Keep
        }
    }

    /// A stride of one keeps everything, so the pass is skipped outright
    pub fn downsampling_active(&self) -> bool {
        self.coarse_save_freq > 1 && self.save_series_start < self.production_window_start
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub expired: usize,
    pub thinned: usize,
}

impl PruneReport {
    pub fn deleted(&self) -> usize {
        self.expired + self.thinned
    }
}

/// Deletes or downsamples loose series files in place
pub trait RetentionPruner {
    fn prune(&self, dir: &Path, patterns: &[SeriesPattern], window: &RetentionWindow) -> Result<PruneReport, ArchiverError>;
}

/// Index-driven pruner over whatever the indexer reports as loose
pub struct SeriesPruner<'a> {
    indexer: &'a dyn FileIndexer,
}

impl<'a> SeriesPruner<'a> {
    pub fn new(indexer: &'a dyn FileIndexer) -> Self {
        Self { indexer }
    }

    fn delete(dir: &Path, file: &SeriesFile) -> Result<bool, ArchiverError> {
        debug!(file = %file.name.display(), index = file.index, "Deleting");
        match fs::remove_file(dir.join(&file.name)) {
            Ok(()) => Ok(true),
            // Another writer or an earlier partial run got there first
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ArchiverError::Io(e)),
        }
    }
}

impl RetentionPruner for SeriesPruner<'_> {
    fn prune(&self, dir: &Path, patterns: &[SeriesPattern], window: &RetentionWindow) -> Result<PruneReport, ArchiverError> {
        let mut report = PruneReport::default();

        for pattern in patterns {
            let files = self.indexer.list(pattern)?;

            for file in files.iter().filter(|f| f.index < window.save_series_start) {
                if Self::delete(dir, file)? {
                    report.expired += 1;
                }
            }

            if !window.downsampling_active() {
                continue;
            }
            for file in files
                .iter()
                .filter(|f| window.disposition(f.index) == Disposition::Thinned)
            {
                if Self::delete(dir, file)? {
                    report.thinned += 1;
                }
            }
        }

        if report.deleted() > 0 {
            info!(
                expired = report.expired,
                thinned = report.thinned,
                "Pruned files outside the retention window"
            );
        }
        Ok(report)
    }
}
