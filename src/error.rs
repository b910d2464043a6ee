use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ArchiverError {
    /// Missing or inconsistent invocation parameter, raised before any mutation
    Config(String),
    /// API misuse, e.g. unlocking a lock that was never taken
    Protocol(String),
    Io(std::io::Error),
    /// External tool exited unsuccessfully
    Tool {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    /// Compressor failed twice for the same file set
    CompressionFailed {
        files: Vec<PathBuf>,
        stderr: String,
    },
    Serialization(serde_json::Error),
}

impl fmt::Display for ArchiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiverError::Config(e) => write!(f, "Configuration error: {}", e),
            ArchiverError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ArchiverError::Io(e) => write!(f, "IO error: {}", e),
            ArchiverError::Tool { program, status, stderr } => match status {
                Some(code) => write!(f, "`{}` exited with status {}: {}", program, code, stderr.trim()),
                None => write!(f, "`{}` was terminated by a signal: {}", program, stderr.trim()),
            },
            ArchiverError::CompressionFailed { files, stderr } => write!(
                f,
                "Compression failed for {} file(s) after retry: {}",
                files.len(),
                stderr.trim()
            ),
            ArchiverError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ArchiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiverError::Io(e) => Some(e),
            ArchiverError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArchiverError {
    fn from(err: std::io::Error) -> Self {
        ArchiverError::Io(err)
    }
}

impl From<serde_json::Error> for ArchiverError {
    fn from(err: serde_json::Error) -> Self {
        ArchiverError::Serialization(err)
    }
}
