use crate::{series::SeriesPattern, ArchiverError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Conservative byte budget for a directly spawned command line.
/// Linux allows more in total, but a single argv string caps at 128 KiB.
pub const DEFAULT_ARG_BUDGET: usize = 96 * 1024;

/// Whether series members are compressed individually before archiving.
/// Threaded explicitly to every component; a bundle's extension records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Plain,
    Compressed,
}

impl CompressionMode {
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            CompressionMode::Compressed
        } else {
            CompressionMode::Plain
        }
    }

    pub fn is_compressed(self) -> bool {
        self == CompressionMode::Compressed
    }

    /// Bundle extension, without the leading dot
    pub fn bundle_extension(self) -> &'static str {
        match self {
            CompressionMode::Plain => "tar",
            CompressionMode::Compressed => "gz.tar",
        }
    }

    /// Infer the mode a bundle was written under from its file name
    pub fn of_bundle_name(name: &str) -> Option<Self> {
        if name.ends_with(".gz.tar") {
            Some(CompressionMode::Compressed)
        } else if name.ends_with(".tar") {
            Some(CompressionMode::Plain)
        } else {
            None
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::Plain => write!(f, "plain"),
            CompressionMode::Compressed => write!(f, "compressed"),
        }
    }
}

/// Zero-padded index formatting, written printf-style (`06d`, `%06d`, `d`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexFormat {
    pub width: usize,
}

impl IndexFormat {
    pub fn padded(width: usize) -> Self {
        Self { width }
    }

    /// Whether a digit run could have been produced by this format
    pub fn accepts(&self, digits: &str) -> bool {
        if self.width == 0 || digits.len() == self.width {
            return true;
        }
        digits.len() > self.width && !digits.starts_with('0')
    }
}

impl FromStr for IndexFormat {
    type Err = ArchiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim().trim_start_matches('%');
        let body = spec
            .strip_suffix('d')
            .ok_or_else(|| ArchiverError::Config(format!("unsupported index format `{}`", s)))?;
        if body.is_empty() {
            return Ok(Self::default());
        }
        let width = body
            .trim_start_matches('0')
            .parse::<usize>()
            .or_else(|e| if body.chars().all(|c| c == '0') { Ok(0) } else { Err(e) })
            .map_err(|_| ArchiverError::Config(format!("unsupported index format `{}`", s)))?;
        Ok(Self { width })
    }
}

/// Validated parameters for one rolling archival run against a target
#[derive(Debug, Clone)]
pub struct RollingConfig {
    pub work_dir: PathBuf,
    /// Bundle base name; also names the lock marker
    pub target: String,
    pub headers: Vec<String>,
    pub tail: Option<String>,
    pub index_format: Option<IndexFormat>,
    pub save_series_start: u64,
    pub production_interval: u64,
    pub coarse_save_freq: u64,
    pub latest_index: Option<u64>,
    pub compression: CompressionMode,
}

impl RollingConfig {
    pub fn builder() -> RollingConfigBuilder {
        RollingConfigBuilder::default()
    }

    pub fn patterns(&self) -> Vec<SeriesPattern> {
        self.headers
            .iter()
            .map(|h| SeriesPattern::new(h, self.tail.as_deref()).with_format(self.index_format))
            .collect()
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.work_dir, &self.target)
    }

    pub fn coarse_stem(&self) -> String {
        format!("{}_coarse", self.target)
    }

    pub fn production_stem(&self, bucket: u64) -> String {
        format!("{}.{}", self.target, bucket)
    }
}

pub fn lock_path_for(work_dir: &Path, target: &str) -> PathBuf {
    work_dir.join(format!("{}.LOCK", target))
}

/// Collects invocation parameters; `build` rejects anything missing before
/// the filesystem is touched.
#[derive(Debug, Default, Clone)]
pub struct RollingConfigBuilder {
    work_dir: Option<PathBuf>,
    target: Option<String>,
    headers: Vec<String>,
    tail: Option<String>,
    index_format: Option<IndexFormat>,
    save_series_start: Option<u64>,
    production_interval: Option<u64>,
    coarse_save_freq: Option<u64>,
    latest_index: Option<u64>,
    compress: Option<bool>,
}

impl RollingConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn tail(mut self, tail: Option<String>) -> Self {
        self.tail = tail;
        self
    }

    pub fn index_format(mut self, format: Option<IndexFormat>) -> Self {
        self.index_format = format;
        self
    }

    pub fn save_series_start(mut self, value: u64) -> Self {
        self.save_series_start = Some(value);
        self
    }

    pub fn production_interval(mut self, value: u64) -> Self {
        self.production_interval = Some(value);
        self
    }

    pub fn coarse_save_freq(mut self, value: u64) -> Self {
        self.coarse_save_freq = Some(value);
        self
    }

    pub fn latest_index(mut self, value: Option<u64>) -> Self {
        self.latest_index = value;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn build(self) -> Result<RollingConfig, ArchiverError> {
        let target = self
            .target
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing("target bundle name (--tarname)"))?;
        if target.contains('/') {
            return Err(ArchiverError::Config(format!(
                "target `{}` must be a bare name, not a path",
                target
            )));
        }
        let headers: Vec<String> = self.headers.into_iter().filter(|h| !h.trim().is_empty()).collect();
        if headers.is_empty() {
            return Err(missing("at least one file series header (--headers)"));
        }
        let save_series_start = self
            .save_series_start
            .ok_or_else(|| missing("save_series_start (--save-series-start)"))?;
        let production_interval = self
            .production_interval
            .ok_or_else(|| missing("production_interval (--production-interval)"))?;
        let coarse_save_freq = self
            .coarse_save_freq
            .ok_or_else(|| missing("coarse_save_freq (--coarse-save-freq)"))?;
        if production_interval == 0 {
            return Err(ArchiverError::Config("production_interval must be positive".to_string()));
        }
        if coarse_save_freq == 0 {
            return Err(ArchiverError::Config("coarse_save_freq must be positive".to_string()));
        }
        let tail = self
            .tail
            .map(|t| t.trim_start_matches('.').to_string())
            .filter(|t| !t.is_empty());

        Ok(RollingConfig {
            work_dir: self.work_dir.unwrap_or_else(|| PathBuf::from(".")),
            target,
            headers,
            tail,
            index_format: self.index_format,
            save_series_start,
            production_interval,
            coarse_save_freq,
            latest_index: self.latest_index,
            compression: CompressionMode::from_flag(self.compress.unwrap_or(true)),
        })
    }
}

fn missing(what: &str) -> ArchiverError {
    ArchiverError::Config(format!("missing required parameter: {}", what))
}

/// External programs the concrete adapters drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub tar: String,
    pub compressor: String,
    pub xargs: String,
    pub arg_budget: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tar: "tar".to_string(),
            compressor: "pigz".to_string(),
            xargs: "xargs".to_string(),
            arg_budget: DEFAULT_ARG_BUDGET,
        }
    }
}

impl ToolConfig {
    /// Defaults overridden by `SERIES_ARCHIVER_*` environment variables
    pub fn from_env() -> Self {
        let mut tools = Self::default();
        if let Ok(tar) = std::env::var("SERIES_ARCHIVER_TAR") {
            tools.tar = tar;
        }
        if let Ok(compressor) = std::env::var("SERIES_ARCHIVER_COMPRESSOR") {
            tools.compressor = compressor;
        }
        if let Ok(xargs) = std::env::var("SERIES_ARCHIVER_XARGS") {
            tools.xargs = xargs;
        }
        if let Some(budget) = std::env::var("SERIES_ARCHIVER_ARG_BUDGET")
            .ok()
            .and_then(|b| b.parse::<usize>().ok())
        {
            tools.arg_budget = budget;
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RollingConfigBuilder {
        RollingConfig::builder()
            .target("y0")
            .header("q.y0")
            .save_series_start(100)
            .production_interval(50)
            .coarse_save_freq(10)
    }

    #[test]
    fn test_build_defaults_to_compressed_and_cwd() {
        let config = base().build().unwrap();
        assert_eq!(config.compression, CompressionMode::Compressed);
        assert_eq!(config.work_dir, PathBuf::from("."));
        assert_eq!(config.lock_path(), PathBuf::from("./y0.LOCK"));
    }

    #[test]
    fn test_missing_required_parameters_are_config_errors() {
        let err = RollingConfig::builder()
            .target("y0")
            .header("q.y0")
            .production_interval(50)
            .coarse_save_freq(10)
            .build()
            .unwrap_err();
        assert!(matches!(err, ArchiverError::Config(ref m) if m.contains("save_series_start")));

        let err = RollingConfig::builder()
            .target("y0")
            .save_series_start(1)
            .production_interval(50)
            .coarse_save_freq(10)
            .build()
            .unwrap_err();
        assert!(matches!(err, ArchiverError::Config(ref m) if m.contains("header")));

        assert!(matches!(base().production_interval(0).build(), Err(ArchiverError::Config(_))));
    }

    #[test]
    fn test_tail_leading_dot_is_stripped() {
        let config = base().tail(Some(".triq".to_string())).build().unwrap();
        assert_eq!(config.tail.as_deref(), Some("triq"));
    }

    #[test]
    fn test_index_format_parsing() {
        assert_eq!("06d".parse::<IndexFormat>().unwrap(), IndexFormat::padded(6));
        assert_eq!("%04d".parse::<IndexFormat>().unwrap(), IndexFormat::padded(4));
        assert_eq!("d".parse::<IndexFormat>().unwrap(), IndexFormat::default());
        assert!("06x".parse::<IndexFormat>().is_err());
    }

    #[test]
    fn test_index_format_accepts_overflowing_width() {
        let fmt = IndexFormat::padded(6);
        assert!(fmt.accepts("000100"));
        assert!(fmt.accepts("1000000"));
        assert!(!fmt.accepts("0100"));
        assert!(!fmt.accepts("00001000"));
    }

    #[test]
    fn test_bundle_extension_round_trip() {
        for mode in [CompressionMode::Plain, CompressionMode::Compressed] {
            let name = format!("y0.100.{}", mode.bundle_extension());
            assert_eq!(CompressionMode::of_bundle_name(&name), Some(mode));
        }
        assert_eq!(CompressionMode::of_bundle_name("y0.LOCK"), None);
    }
}
