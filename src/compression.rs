use crate::{
    command::{self, Manifest},
    config::ToolConfig,
    ArchiverError,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// In-place per-file compression: `f` becomes `f.gz` and back
pub trait Compressor {
    fn compress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError>;

    /// Takes the `.gz` names
    fn decompress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Compress,
    Decompress,
}

impl Direction {
    fn flags(self) -> &'static [&'static str] {
        match self {
            Direction::Compress => &["-f"],
            Direction::Decompress => &["-d", "-f"],
        }
    }

    /// Inputs that have not been converted yet
    fn pending(self, dir: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
        files.iter().filter(|f| dir.join(f).exists()).cloned().collect()
    }
}

/// Drives a gzip-compatible parallel compressor (`pigz` by default).
///
/// Short lists go straight to argv. Lists over the argument budget, or ones
/// the kernel rejects with E2BIG, are written to a manifest and fed through
/// `xargs -0`; both routes process the same files.
#[derive(Debug, Clone)]
pub struct CompressionDispatcher {
    program: String,
    xargs: String,
    arg_budget: usize,
}

impl CompressionDispatcher {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            program: tools.compressor.clone(),
            xargs: tools.xargs.clone(),
            arg_budget: tools.arg_budget,
        }
    }

    pub fn with_arg_budget(mut self, arg_budget: usize) -> Self {
        self.arg_budget = arg_budget;
        self
    }

    fn dispatch(&self, dir: &Path, flags: &[&str], files: &[PathBuf]) -> Result<Output, ArchiverError> {
        if command::fits_command_line(&self.program, flags, files, self.arg_budget) {
            let mut direct = Command::new(&self.program);
            direct.args(flags).args(files).current_dir(dir);
            match direct.output() {
                Ok(output) => return Ok(output),
                Err(e) if command::is_arg_list_too_long(&e) => {
                    debug!(files = files.len(), "argument list too long, falling back to manifest");
                }
                Err(e) => return Err(command::spawn_error(e, &self.program)),
            }
        }

        let manifest = Manifest::write(dir, &format!("{}_", self.program_stem()), files)?;
        let mut batched = Command::new(&self.xargs);
        batched
            .arg("-0")
            .arg(&self.program)
            .args(flags)
            .stdin(manifest.open()?)
            .current_dir(dir);
        let output = command::spawn_output(&mut batched, &self.xargs)?;
        manifest.remove()?;
        Ok(output)
    }

    fn program_stem(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "compress".to_string())
    }

    fn run(&self, direction: Direction, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if files.is_empty() {
            return Ok(());
        }

        let output = self.dispatch(dir, direction.flags(), files)?;
        if output.status.success() {
            return Ok(());
        }

        // One retry, restricted to files the first attempt did not convert
        let remaining = direction.pending(dir, files);
        warn!(
            program = %self.program,
            remaining = remaining.len(),
            "{} failed, retrying once: {}",
            self.program,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        if remaining.is_empty() {
            return Ok(());
        }
        let retried = self.dispatch(dir, direction.flags(), &remaining)?;
        if retried.status.success() {
            return Ok(());
        }

        Err(ArchiverError::CompressionFailed {
            files: direction.pending(dir, &remaining),
            stderr: String::from_utf8_lossy(&retried.stderr).to_string(),
        })
    }
}

impl Compressor for CompressionDispatcher {
    fn compress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if !files.is_empty() {
            info!(files = files.len(), "Compressing with {}", self.program);
        }
        self.run(Direction::Compress, dir, files)
    }

    fn decompress(&self, dir: &Path, files: &[PathBuf]) -> Result<(), ArchiverError> {
        if !files.is_empty() {
            info!(files = files.len(), "Decompressing with {}", self.program);
        }
        self.run(Direction::Decompress, dir, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_pending_skips_converted_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.1.gz"), b"").unwrap();
        fs::write(dir.path().join("a.2"), b"").unwrap();
        let files = vec![PathBuf::from("a.1"), PathBuf::from("a.2")];
        assert_eq!(Direction::Compress.pending(dir.path(), &files), vec![PathBuf::from("a.2")]);

        let gz = vec![PathBuf::from("a.1.gz")];
        assert_eq!(Direction::Decompress.pending(dir.path(), &gz), gz);
    }

    #[test]
    fn test_empty_list_never_spawns() {
        let dispatcher = CompressionDispatcher::new(&ToolConfig {
            compressor: "definitely-not-a-compressor".to_string(),
            ..ToolConfig::default()
        });
        let dir = tempfile::tempdir().unwrap();
        dispatcher.compress(dir.path(), &[]).unwrap();
        dispatcher.decompress(dir.path(), &[]).unwrap();
    }

    #[test]
    fn test_missing_program_is_tool_error() {
        let dispatcher = CompressionDispatcher::new(&ToolConfig {
            compressor: "definitely-not-a-compressor".to_string(),
            ..ToolConfig::default()
        });
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.1"), b"").unwrap();
        let err = dispatcher.compress(dir.path(), &[PathBuf::from("a.1")]).unwrap_err();
        assert!(matches!(err, ArchiverError::Tool { .. }));
        assert!(dir.path().join("a.1").exists());
    }

    #[test]
    fn test_failing_compressor_retries_then_reports_pending_files() {
        if Command::new("false").output().is_err() {
            return;
        }
        let dispatcher = CompressionDispatcher::new(&ToolConfig {
            compressor: "false".to_string(),
            ..ToolConfig::default()
        });
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.1"), b"payload").unwrap();

        let err = dispatcher.compress(dir.path(), &[PathBuf::from("a.1")]).unwrap_err();
        match err {
            ArchiverError::CompressionFailed { files, .. } => assert_eq!(files, vec![PathBuf::from("a.1")]),
            other => panic!("expected CompressionFailed, got {:?}", other),
        }
        assert_eq!(fs::read(dir.path().join("a.1")).unwrap(), b"payload");
        assert!(!dir.path().join("a.1.gz").exists());
    }
}
