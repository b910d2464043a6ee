use crate::{
    bundle::bundle_file_name,
    command::{self, Manifest},
    compression::Compressor,
    config::{CompressionMode, ToolConfig},
    series::{is_compressed_name, strip_compressed_suffix, with_compressed_suffix, FileIndexer, SeriesFile, SeriesPattern},
    ArchiverError,
};
use itertools::Itertools;
use rustc_hash::FxHashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Archive-format writer. Member names are relative to `dir`, where the
/// bundle also lives.
pub trait ArchiveBackend {
    fn create(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError>;

    fn append(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError>;

    /// Extract every member into `dir`, leaving the bundle in place
    fn extract(&self, dir: &Path, bundle: &Path) -> Result<(), ArchiverError>;

    fn list(&self, dir: &Path, bundle: &Path) -> Result<Vec<PathBuf>, ArchiverError>;
}

/// `tar` driven through a NUL-separated `-T` manifest so member lists of
/// any length stay off the command line
#[derive(Debug, Clone)]
pub struct TarBackend {
    program: String,
}

impl TarBackend {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            program: tools.tar.clone(),
        }
    }

    fn write_members(&self, mode_flag: &str, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError> {
        let manifest_prefix = format!("tar_{}_", bundle.to_string_lossy());
        let manifest = Manifest::write(dir, &manifest_prefix, members)?;
        debug!(manifest = %manifest.path().display(), members = members.len(), "tar manifest written");
        let mut tar = Command::new(&self.program);
        tar.arg(mode_flag)
            .arg(bundle)
            .arg("--null")
            .arg("-T")
            .arg(manifest.file_name())
            .current_dir(dir);
        command::run_checked(&mut tar, &self.program)?;
        manifest.remove()
    }
}

impl ArchiveBackend for TarBackend {
    fn create(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError> {
        self.write_members("-cf", dir, bundle, members)
    }

    fn append(&self, dir: &Path, bundle: &Path, members: &[PathBuf]) -> Result<(), ArchiverError> {
        self.write_members("-rf", dir, bundle, members)
    }

    fn extract(&self, dir: &Path, bundle: &Path) -> Result<(), ArchiverError> {
        let mut tar = Command::new(&self.program);
        tar.arg("-xf").arg(bundle).current_dir(dir);
        command::run_checked(&mut tar, &self.program)?;
        Ok(())
    }

    fn list(&self, dir: &Path, bundle: &Path) -> Result<Vec<PathBuf>, ArchiverError> {
        let mut tar = Command::new(&self.program);
        tar.arg("-tf").arg(bundle).current_dir(dir);
        let output = command::run_checked(&mut tar, &self.program)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty() && !l.ends_with('/'))
            .map(PathBuf::from)
            .unique()
            .collect())
    }
}

/// What to fold into a bundle
#[derive(Debug, Clone)]
pub enum ArchiveInput<'p> {
    Files(Vec<PathBuf>),
    Patterns(&'p [SeriesPattern]),
}

/// Create-or-append, compress-first archiving with move semantics
pub struct ArchivePrimitive<'a> {
    dir: &'a Path,
    backend: &'a dyn ArchiveBackend,
    compressor: &'a dyn Compressor,
    indexer: &'a dyn FileIndexer,
}

impl<'a> ArchivePrimitive<'a> {
    pub fn new(
        dir: &'a Path,
        backend: &'a dyn ArchiveBackend,
        compressor: &'a dyn Compressor,
        indexer: &'a dyn FileIndexer,
    ) -> Self {
        Self {
            dir,
            backend,
            compressor,
            indexer,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir
    }

    /// Fold files into `stem.<ext>`. Returns how many files were archived.
    pub fn archive(&self, input: ArchiveInput<'_>, stem: &str, mode: CompressionMode) -> Result<usize, ArchiverError> {
        let files = match input {
            ArchiveInput::Files(files) => files,
            ArchiveInput::Patterns(patterns) => self
                .indexer
                .list_all(patterns)?
                .into_iter()
                .map(|f| f.name)
                .collect(),
        };
        self.archive_names(files, stem, mode)
    }

    pub fn archive_files(&self, files: &[SeriesFile], stem: &str, mode: CompressionMode) -> Result<usize, ArchiverError> {
        self.archive_names(files.iter().map(|f| f.name.clone()).collect(), stem, mode)
    }

    fn archive_names(&self, files: Vec<PathBuf>, stem: &str, mode: CompressionMode) -> Result<usize, ArchiverError> {
        let files: Vec<PathBuf> = files.into_iter().unique().collect();
        if files.is_empty() {
            return Ok(0);
        }

        let (already_compressed, plain): (Vec<PathBuf>, Vec<PathBuf>) =
            files.into_iter().partition(|f| is_compressed_name(f));

        let members: Vec<PathBuf> = if mode.is_compressed() {
            self.compressor.compress(self.dir, &plain)?;
            plain
                .iter()
                .map(|f| with_compressed_suffix(f))
                .chain(already_compressed)
                .unique()
                .collect()
        } else {
            self.compressor.decompress(self.dir, &already_compressed)?;
            already_compressed
                .iter()
                .map(|f| strip_compressed_suffix(f))
                .chain(plain)
                .unique()
                .collect()
        };

        let bundle = PathBuf::from(bundle_file_name(stem, mode));
        if self.dir.join(&bundle).is_file() {
            info!(bundle = %bundle.display(), files = members.len(), "Appending to archive");
            self.backend.append(self.dir, &bundle, &members)?;
        } else {
            info!(bundle = %bundle.display(), files = members.len(), "Creating archive");
            self.backend.create(self.dir, &bundle, &members)?;
        }

        // Sources go only once the writer has confirmed success
        for member in &members {
            remove_if_present(&self.dir.join(member))?;
        }
        Ok(members.len())
    }

    /// Archive every match except the `keep` most recent distinct indices
    pub fn archive_keep_last_n(
        &self,
        patterns: &[SeriesPattern],
        stem: &str,
        keep: usize,
        mode: CompressionMode,
    ) -> Result<usize, ArchiverError> {
        let files = self.indexer.list_all(patterns)?;
        let indices: Vec<u64> = files.iter().map(|f| f.index).dedup().collect();
        let kept: FxHashSet<u64> = indices.iter().rev().take(keep).copied().collect();
        let selected: Vec<SeriesFile> = files.into_iter().filter(|f| !kept.contains(&f.index)).collect();
        self.archive_files(&selected, stem, mode)
    }

    /// Turn a bundle back into loose, uncompressed files and delete it.
    /// Returns the restored names.
    pub fn rehydrate(&self, bundle: &Path) -> Result<Vec<PathBuf>, ArchiverError> {
        let members = self.backend.list(self.dir, bundle)?;
        info!(bundle = %bundle.display(), files = members.len(), "Extracting archive");
        self.backend.extract(self.dir, bundle)?;

        let compressed: Vec<PathBuf> = members.iter().filter(|m| is_compressed_name(m)).cloned().collect();
        self.compressor.decompress(self.dir, &compressed)?;

        remove_if_present(&self.dir.join(bundle))?;
        Ok(members.iter().map(|m| strip_compressed_suffix(m)).collect())
    }
}

fn remove_if_present(path: &Path) -> Result<(), ArchiverError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArchiverError::Io(e)),
    }
}

/// Default bundle stem for a glob pattern: wildcards and bracket classes
/// removed, doubled dots collapsed (`q.y0.*` becomes `q.y0`)
pub fn default_archive_name(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    let mut in_class = false;
    for c in glob.chars() {
        match c {
            '[' => in_class = true,
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '*' | '?' => {}
            _ => out.push(c),
        }
    }
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out.trim_end_matches('.').to_string()
}
