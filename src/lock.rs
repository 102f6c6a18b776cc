//! Workspace advisory locking.
//!
//! Every mutating operation on a workspace takes an exclusive advisory lock
//! on `<workspace>/.fst/workspace.lock` for its duration, via `fs4`'s
//! cross-platform `flock`. This prevents two processes (e.g. a CLI
//! invocation and a background agent) from racing on the same working
//! tree.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;

use crate::error::{FstError, Result};

/// Default interval between retry attempts while waiting for a busy lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A held advisory lock on a workspace. Releasing (dropping) this value
/// unlocks the file.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the lock at `path`, blocking up to `timeout` if it's held by
    /// another process.
    ///
    /// # Errors
    /// Returns [`FstError::LockBusy`] if the lock is still held after
    /// `timeout`, or [`FstError::Storage`] on I/O failure.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(FstError::LockBusy {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(FstError::Storage(e)),
            }
        }
    }

    /// Try to acquire the lock without blocking at all.
    ///
    /// # Errors
    /// Returns [`FstError::LockBusy`] immediately if the lock is held, or
    /// [`FstError::Storage`] on I/O failure.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        Self::acquire(path, Duration::ZERO)
    }

    /// The lock file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
