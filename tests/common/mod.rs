#![allow(dead_code)]

use series_archiver::{
    archive::ArchiveBackend,
    command,
    compression::Compressor,
    config::{RollingConfig, ToolConfig},
    series::with_compressed_suffix,
    ArchiverError,
};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const GZ_MAGIC: &[u8] = b"FAKEGZ:";

/// Bundle stored as a JSON map of member name to contents
#[derive(Default)]
pub struct JsonBackend {
    pub fail_writes: bool,
    pub writes: Cell<usize>,
}

impl JsonBackend {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    fn load(dir: &Path, bundle: &Path) -> Result<BTreeMap<String, Vec<u8>>, ArchiverError> {
        let path = dir.join(bundle);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn store(&self, dir: &Path, bundle: &Path, members: &[PathBuf], append: bool) -> Result<(), ArchiverError> {
        if self.fail_writes {
            return Err(ArchiverError::Tool {
                program: "fake-tar".to_string(),
                status: Some(2),
                stderr: "simulated failure".to_string(),
            });
        }
        let mut contents = if append { Self::load(dir, bundle)? } else { BTreeMap::new() };
        for member in members {
            contents.insert(member.to_string_lossy().to_string(), fs::read(dir.join(member))?);
        }
        fs::write(dir.join(bundle), serde_json::to_vec(&contents)?)?;
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    /// Member names of a bundle, for assertions
    pub fn members(dir: &Path, bundle: &str) -> Vec<String> {
        Self::load(dir, Path::new(bundle)).unwrap().into_keys().collect()
    }
}

impl ArchiveBackend for JsonBackend {
    fn create(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError> {
        self.store(dir, bundle, members, false)
    }

    fn append(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError> {
        self.store(dir, bundle, members, true)
    }

    fn extract(&self, dir: &Path, bundle: &Path) -> Result<(), ArchiverError> {
        for (name, data) in Self::load(dir, bundle)? {
            fs::write(dir.join(name), data)?;
        }
        Ok(())
    }

    fn list(&self, dir: &Path, bundle: &Path) -> Result<Vec<PathBuf>, ArchiverError> {
        Ok(Self::load(dir, bundle)?.into_keys().map(PathBuf::from).collect())
    }
}

/// Renames `f` to `f.gz` with a marker prefix and back
#[derive(Default)]
pub struct PrefixCompressor {
    pub calls: Cell<usize>,
}

impl Compressor for PrefixCompressor {
    fn compress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if files.is_empty() {
            return Ok(());
        }
        self.calls.set(self.calls.get() + 1);
        for file in files {
            let mut data = GZ_MAGIC.to_vec();
            data.extend(fs::read(dir.join(file))?);
            fs::write(dir.join(with_compressed_suffix(file)), data)?;
            fs::remove_file(dir.join(file))?;
        }
        Ok(())
    }

    fn decompress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if files.is_empty() {
            return Ok(());
        }
        self.calls.set(self.calls.get() + 1);
        for file in files {
            let data = fs::read(dir.join(file))?;
            let plain = data.strip_prefix(GZ_MAGIC).unwrap_or(&data);
            let name = file.to_string_lossy();
            let original = name.strip_suffix(".gz").unwrap_or(&name).to_string();
            fs::write(dir.join(original), plain)?;
            fs::remove_file(dir.join(file))?;
        }
        Ok(())
    }
}

/// Compressor whose every invocation fails, as after the retry is spent
pub struct FailingCompressor;

impl Compressor for FailingCompressor {
    fn compress(&self, _dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        Err(ArchiverError::CompressionFailed {
            files: files.to_vec(),
            stderr: "simulated failure".to_string(),
        })
    }

    fn decompress(&self, _dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if files.is_empty() {
            return Ok(());
        }
        Err(ArchiverError::CompressionFailed {
            files: files.to_vec(),
            stderr: "simulated failure".to_string(),
        })
    }
}

/// Write `header.<index>` files, zero-padded to six digits, each holding its index
pub fn make_series(dir: &Path, header: &str, indices: impl IntoIterator<Item = u64>) {
    for i in indices {
        fs::write(dir.join(format!("{}.{:06}", header, i)), i.to_string()).unwrap();
    }
}

pub fn loose_indices(dir: &Path, header: &str) -> Vec<u64> {
    let mut out: Vec<u64> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter_map(|n| {
            n.strip_prefix(&format!("{}.", header))
                .and_then(|rest| rest.parse::<u64>().ok())
        })
        .collect();
    out.sort();
    out
}

pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

pub fn config(dir: &Path, sss: u64, interval: u64, freq: u64, compress: bool) -> RollingConfig {
    RollingConfig::builder()
        .work_dir(dir)
        .target("y0")
        .header("q.y0")
        .save_series_start(sss)
        .production_interval(interval)
        .coarse_save_freq(freq)
        .compress(compress)
        .build()
        .unwrap()
}

/// tar + gzip tool set, or `None` when either is missing on this host
pub fn real_tools() -> Option<ToolConfig> {
    let tools = ToolConfig {
        compressor: "gzip".to_string(),
        ..ToolConfig::default()
    };
    if command::tool_available(&tools.tar) && command::tool_available(&tools.compressor) {
        Some(tools)
    } else {
        eprintln!("tar or gzip not available, skipping");
        None
    }
}
