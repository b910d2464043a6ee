use crate::{config::IndexFormat, ArchiverError};
use itertools::Itertools;
use std::fs;
use std::path::{Path, PathBuf};

pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Naming scheme of one file series: `<header>.<index>[.<tail>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPattern {
    pub header: String,
    pub tail: Option<String>,
    pub format: Option<IndexFormat>,
}

impl SeriesPattern {
    pub fn new(header: &str, tail: Option<&str>) -> Self {
        Self {
            header: header.to_string(),
            tail: tail.map(|t| t.trim_start_matches('.').to_string()).filter(|t| !t.is_empty()),
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<IndexFormat>) -> Self {
        self.format = format;
        self
    }

    /// Glob-style rendering, for messages
    pub fn glob(&self) -> String {
        match &self.tail {
            Some(tail) => format!("{}.*.{}", self.header, tail),
            None => format!("{}.*", self.header),
        }
    }

    /// Extract the match index from a file name. The flag reports a loose
    /// member left compressed (`.gz`) by an interrupted run.
    pub fn parse_index(&self, file_name: &str) -> Option<(u64, bool)> {
        let (name, compressed) = match file_name.strip_suffix(COMPRESSED_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (file_name, false),
        };
        let rest = name.strip_prefix(self.header.as_str())?.strip_prefix('.')?;
        let digits = match &self.tail {
            Some(tail) => rest.strip_suffix(tail.as_str())?.strip_suffix('.')?,
            None => rest,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if let Some(format) = &self.format {
            if !format.accepts(digits) {
                return None;
            }
        }
        digits.parse::<u64>().ok().map(|index| (index, compressed))
    }
}

/// A loose member of a file series, named relative to the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFile {
    pub name: PathBuf,
    pub index: u64,
    pub compressed: bool,
}

pub fn strip_compressed_suffix(name: &Path) -> PathBuf {
    let text = name.to_string_lossy();
    match text.strip_suffix(COMPRESSED_SUFFIX) {
        Some(stripped) => PathBuf::from(stripped),
        None => name.to_path_buf(),
    }
}

pub fn with_compressed_suffix(name: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", name.to_string_lossy(), COMPRESSED_SUFFIX))
}

pub fn is_compressed_name(name: &Path) -> bool {
    name.to_string_lossy().ends_with(COMPRESSED_SUFFIX)
}

/// Lists the members of a file series ordered by match index
pub trait FileIndexer {
    fn list(&self, pattern: &SeriesPattern) -> Result<Vec<SeriesFile>, ArchiverError>;

    /// Members of several series merged into one index-ordered list
    fn list_all(&self, patterns: &[SeriesPattern]) -> Result<Vec<SeriesFile>, ArchiverError> {
        let mut files = Vec::new();
        for pattern in patterns {
            files.extend(self.list(pattern)?);
        }
        files.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }

    fn latest_index(&self, pattern: &SeriesPattern) -> Result<Option<u64>, ArchiverError> {
        Ok(self.list(pattern)?.last().map(|f| f.index))
    }
}

/// Scans one flat directory
#[derive(Debug, Clone)]
pub struct DirIndexer {
    dir: PathBuf,
}

impl DirIndexer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FileIndexer for DirIndexer {
    fn list(&self, pattern: &SeriesPattern) -> Result<Vec<SeriesFile>, ArchiverError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some((index, compressed)) = pattern.parse_index(name) {
                files.push(SeriesFile {
                    name: PathBuf::from(name),
                    index,
                    compressed,
                });
            }
        }

        Ok(files
            .into_iter()
            .sorted_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)))
            .collect())
    }
}
