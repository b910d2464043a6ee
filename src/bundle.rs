use crate::{config::CompressionMode, ArchiverError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "lowercase")]
pub enum BundleTier {
    Coarse,
    Production { bucket: u64 },
}

/// An archive bundle belonging to a target, found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    pub name: PathBuf,
    pub tier: BundleTier,
    pub mode: CompressionMode,
}

impl Bundle {
    pub fn bucket(&self) -> Option<u64> {
        match self.tier {
            BundleTier::Production { bucket } => Some(bucket),
            BundleTier::Coarse => None,
        }
    }
}

/// Start index of the production bundle currently being filled.
///
/// When `latest_index` sits exactly on an interval boundary the previous
/// bucket is used, so a fresh bundle is not opened the moment a boundary is
/// crossed. Later runs move the boundary file into its own bucket once newer
/// files exist.
pub fn production_bucket(latest_index: u64, production_interval: u64) -> u64 {
    let bucket = latest_index / production_interval * production_interval;
    if latest_index == bucket {
        bucket.saturating_sub(production_interval)
    } else {
        bucket
    }
}

/// Bundle file name for a stem under the given mode
pub fn bundle_file_name(stem: &str, mode: CompressionMode) -> String {
    format!("{}.{}", stem, mode.bundle_extension())
}

/// Classify a file name as one of `target`'s bundles
pub fn parse_bundle_name(target: &str, file_name: &str) -> Option<Bundle> {
    let mode = CompressionMode::of_bundle_name(file_name)?;
    let stem = file_name.strip_suffix(mode.bundle_extension())?.strip_suffix('.')?;
    let rest = stem.strip_prefix(target)?;

    let tier = if rest == "_coarse" {
        BundleTier::Coarse
    } else {
        let digits = rest.strip_prefix('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        BundleTier::Production {
            bucket: digits.parse().ok()?,
        }
    };

    Some(Bundle {
        name: PathBuf::from(file_name),
        tier,
        mode,
    })
}

/// All bundles of `target` in `dir`, coarse first, then production by bucket
pub fn discover_bundles(dir: &Path, target: &str) -> Result<Vec<Bundle>, ArchiverError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut bundles = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(bundle) = entry.file_name().to_str().and_then(|n| parse_bundle_name(target, n)) {
            bundles.push(bundle);
        }
    }

    // None sorts before Some, so the coarse bundle leads
    bundles.sort_by_key(|b| (b.bucket(), b.name.clone()));
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_bucket_floor() {
        assert_eq!(production_bucket(175, 50), 150);
        assert_eq!(production_bucket(199, 50), 150);
        assert_eq!(production_bucket(30, 50), 0);
    }

    #[test]
    fn test_production_bucket_boundary_tie_break() {
        assert_eq!(production_bucket(150, 50), 100);
        assert_eq!(production_bucket(200, 50), 150);
        assert_eq!(production_bucket(0, 50), 0);
    }

    #[test]
    fn test_parse_bundle_names() {
        let coarse = parse_bundle_name("y0", "y0_coarse.gz.tar").unwrap();
        assert_eq!(coarse.tier, BundleTier::Coarse);
        assert_eq!(coarse.mode, CompressionMode::Compressed);

        let prod = parse_bundle_name("y0", "y0.100.tar").unwrap();
        assert_eq!(prod.tier, BundleTier::Production { bucket: 100 });
        assert_eq!(prod.mode, CompressionMode::Plain);

        assert!(parse_bundle_name("y0", "y0.LOCK").is_none());
        assert!(parse_bundle_name("y0", "y0x.100.tar").is_none());
        assert!(parse_bundle_name("y0", "y0.abc.tar").is_none());
        assert!(parse_bundle_name("y0", "q.y0.100.tar").is_none());
    }

    #[test]
    fn test_discover_orders_coarse_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["y0.150.tar", "y0_coarse.tar", "y0.100.gz.tar", "y0.000150", "z.100.tar"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = discover_bundles(dir.path(), "y0")
            .unwrap()
            .into_iter()
            .map(|b| b.name.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["y0_coarse.tar", "y0.100.gz.tar", "y0.150.tar"]);
    }

    #[test]
    fn test_discover_tolerates_max_bucket() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["y0.18446744073709551615.gz.tar", "y0_coarse.gz.tar", "y0.100.gz.tar"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let buckets: Vec<Option<u64>> = discover_bundles(dir.path(), "y0")
            .unwrap()
            .iter()
            .map(Bundle::bucket)
            .collect();
        assert_eq!(buckets, vec![None, Some(100), Some(u64::MAX)]);
    }
}
