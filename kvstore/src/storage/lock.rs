//! Cross-process advisory lock on a database file.
//!
//! The lock is taken on a sidecar `<db>.lock` file rather than the database
//! itself, so it stays held while the database file is closed and reopened
//! during growth. Dropping the lock releases it.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// An exclusive advisory lock held for the lifetime of this value.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock for the database at `db_path`.
    ///
    /// Retries every `retry_interval` while another process holds the lock and
    /// gives up with `LockError::Timeout` once `timeout` has elapsed. Any error
    /// other than contention fails immediately.
    pub fn acquire(
        db_path: &Path,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<Self, LockError> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(LockError::Io)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout { path, waited });
                    }
                    tracing::warn!(
                        "Lock {} is held by another process, retrying in {:?}",
                        path.display(),
                        retry_interval
                    );
                    std::thread::sleep(retry_interval.min(timeout - waited));
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }
    }

    /// Path of the sidecar lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    pub fn release(self) -> Result<(), LockError> {
        FileExt::unlock(&self.file).map_err(LockError::Io)
    }
}

/// Sidecar lock path for a database file: `<db_path>.lock`.
#[must_use]
pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Errors that can occur while acquiring or releasing the lock.
#[derive(Debug)]
pub enum LockError {
    /// I/O error.
    Io(std::io::Error),
    /// Another process kept the lock past the timeout.
    Timeout { path: PathBuf, waited: Duration },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "lock I/O error: {e}"),
            Self::Timeout { path, waited } => write!(
                f,
                "timed out after {waited:?} waiting for lock {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Timeout { .. } => None,
        }
    }
}
