use crate::ArchiverError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Markers older than this are reported as possibly leaked
pub const STALE_LOCK_SECS: u64 = 24 * 3600;

/// Contents of a lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub host: String,
    pub created_unix: u64,
}

impl LockRecord {
    fn current() -> Result<Self, ArchiverError> {
        let created_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ArchiverError::Io(std::io::Error::new(ErrorKind::Other, e)))?
            .as_secs();
        Ok(Self {
            pid: std::process::id(),
            host: gethostname::gethostname().to_string_lossy().to_string(),
            created_unix,
        })
    }
}

/// What is known about an existing marker
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub path: PathBuf,
    pub age_secs: u64,
    /// `None` when the marker is unreadable or predates the JSON format
    pub holder: Option<LockRecord>,
}

impl LockStatus {
    pub fn is_stale(&self) -> bool {
        self.age_secs > STALE_LOCK_SECS
    }

    pub fn age_hours(&self) -> f64 {
        self.age_secs as f64 / 3600.0
    }
}

/// Non-blocking mutual exclusion through a marker file.
///
/// A lock is never expired automatically. A run that fails keeps its marker
/// so an operator notices; `force_unlock` is the manual way out.
#[derive(Debug, Default)]
pub struct ProcessLock {
    lockfile: Option<PathBuf>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self { lockfile: None }
    }

    /// Marker this handle created, if any
    pub fn path(&self) -> Option<&Path> {
        self.lockfile.as_deref()
    }

    /// Try to create the marker. `Ok(false)` means someone else holds it.
    /// With `unique`, a timestamp is appended to the marker name.
    pub fn lock(&mut self, path: impl AsRef<Path>, unique: bool) -> Result<bool, ArchiverError> {
        let mut path = path.as_ref().to_path_buf();
        if unique {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| ArchiverError::Io(std::io::Error::new(ErrorKind::Other, e)))?;
            path = PathBuf::from(format!(
                "{}_{}.{:09}",
                path.to_string_lossy(),
                now.as_secs(),
                now.subsec_nanos()
            ));
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(status) = inspect(&path)? {
                    info!(
                        lockfile = %path.display(),
                        "Lockfile already exists (for {:.6}hrs)",
                        status.age_hours()
                    );
                    if status.is_stale() {
                        warn!(
                            lockfile = %path.display(),
                            "Lockfile is older than one day; the holding process might not have exited cleanly (possibly a leaked lock)"
                        );
                    }
                }
                return Ok(false);
            }
            Err(e) => return Err(ArchiverError::Io(e)),
        };

        let record = LockRecord::current()?;
        let written = serde_json::to_vec_pretty(&record)
            .map_err(ArchiverError::from)
            .and_then(|bytes| file.write_all(&bytes).map_err(ArchiverError::from));
        if let Err(e) = written {
            // Half-written marker would block every later run
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        self.lockfile = Some(path);
        Ok(true)
    }

    /// Remove the marker created by `lock`
    pub fn unlock(&mut self) -> Result<(), ArchiverError> {
        let path = self
            .lockfile
            .take()
            .ok_or_else(|| ArchiverError::Protocol("process has not been locked yet".to_string()))?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    lockfile = %path.display(),
                    "Expected process lockfile does not exist; there may be a loose background process"
                );
                Ok(())
            }
            Err(e) => {
                self.lockfile = Some(path);
                Err(ArchiverError::Io(e))
            }
        }
    }
}

/// Read an existing marker without touching it
pub fn inspect(path: &Path) -> Result<Option<LockStatus>, ArchiverError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ArchiverError::Io(e)),
    };
    let age_secs = metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let holder = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok());

    Ok(Some(LockStatus {
        path: path.to_path_buf(),
        age_secs,
        holder,
    }))
}

/// Operator escape hatch: delete a marker regardless of who holds it.
/// Returns whether a marker was removed.
pub fn force_unlock(path: &Path) -> Result<bool, ArchiverError> {
    if let Some(status) = inspect(path)? {
        match &status.holder {
            Some(holder) => warn!(
                lockfile = %path.display(),
                pid = holder.pid,
                host = %holder.host,
                "Force-removing lock ({:.2}hrs old)",
                status.age_hours()
            ),
            None => warn!(lockfile = %path.display(), "Force-removing lock ({:.2}hrs old)", status.age_hours()),
        }
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ArchiverError::Io(e)),
    }
}
