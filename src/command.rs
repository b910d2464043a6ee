use crate::ArchiverError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::NamedTempFile;
use tracing::debug;

/// errno for "Argument list too long" on Linux and macOS
const E2BIG: i32 = 7;

/// NUL-separated list of file names handed to a tool instead of argv
pub struct Manifest {
    file: NamedTempFile,
}

impl Manifest {
    /// Written inside `dir` so relative names resolve the same way they do
    /// for the tool, which also runs there
    pub fn write(dir: &Path, prefix: &str, names: &[PathBuf]) -> Result<Self, ArchiverError> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".inp")
            .tempfile_in(dir)?;
        {
            let mut writer = io::BufWriter::new(file.as_file_mut());
            for name in names {
                writer.write_all(name.to_string_lossy().as_bytes())?;
                writer.write_all(b"\0")?;
            }
            writer.flush()?;
        }
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Bare name, for tools already running inside the manifest's directory
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.file.path().file_name().unwrap_or(self.file.path().as_os_str())
    }

    pub fn open(&self) -> Result<std::fs::File, ArchiverError> {
        Ok(self.file.reopen()?)
    }

    pub fn remove(self) -> Result<(), ArchiverError> {
        self.file.close().map_err(ArchiverError::Io)
    }
}

/// Cheap estimate of whether `program flags files...` fits on one command line
pub fn fits_command_line(program: &str, flags: &[&str], files: &[PathBuf], budget: usize) -> bool {
    let mut total = program.len() + 1;
    total += flags.iter().map(|f| f.len() + 1).sum::<usize>();
    for file in files {
        total += file.as_os_str().len() + 1;
        if total > budget {
            return false;
        }
    }
    true
}

pub fn is_arg_list_too_long(err: &io::Error) -> bool {
    err.raw_os_error() == Some(E2BIG)
}

/// Run to completion; a non-zero exit becomes `ArchiverError::Tool` carrying stderr
pub fn run_checked(command: &mut Command, program: &str) -> Result<Output, ArchiverError> {
    let output = spawn_output(command, program)?;
    check_status(program, output)
}

pub fn spawn_output(command: &mut Command, program: &str) -> Result<Output, ArchiverError> {
    debug!(program, "running {:?}", command);
    command.output().map_err(|e| spawn_error(e, program))
}

pub fn spawn_error(err: io::Error, program: &str) -> ArchiverError {
    if err.kind() == io::ErrorKind::NotFound {
        ArchiverError::Tool {
            program: program.to_string(),
            status: None,
            stderr: format!("program not found: {}", err),
        }
    } else {
        ArchiverError::Io(err)
    }
}

pub fn check_status(program: &str, output: Output) -> Result<Output, ArchiverError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(ArchiverError::Tool {
            program: program.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Probe whether a program can be executed at all
pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_command_line_budget() {
        let files: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("q.y0.{:06}", i))).collect();
        assert!(fits_command_line("pigz", &[], &files, 1024));
        assert!(!fits_command_line("pigz", &["-f"], &files, 64));
    }

    #[test]
    fn test_manifest_is_nul_separated_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec![PathBuf::from("a.1"), PathBuf::from("a 2")];
        let manifest = Manifest::write(dir.path(), "tar_", &names).unwrap();
        let path = manifest.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"a.1\0a 2\0");
        manifest.remove().unwrap();
        assert!(!path.exists());
    }
}
