//! Single-run lock.
//!
//! An exclusive `fs2` advisory lock on `sync.lock`, held for the whole run.
//! The kernel drops it when the holding process exits for any reason,
//! including a signal, so a killed run never blocks the next one. While held,
//! the file carries `{"pid":…,"started_at":…}` so a refused invocation can
//! name the holder. A second invocation fails immediately with
//! [`LockError::Held`]; it never waits.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{lock_io_err, LockError};

#[derive(Debug, Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Held for the duration of one sync run.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
    path: PathBuf,
}

impl SyncLock {
    /// Take the lock at `path` for the current process.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_io_err(parent, e))?;
        }
        // No truncate: the content belongs to whoever holds the lock.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_io_err(path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(LockError::Held {
                    pid: read_holder(path)?.unwrap_or_default(),
                    path: path.to_path_buf(),
                });
            }
            return Err(lock_io_err(path, err));
        }

        if let Some(previous) = read_holder(path)? {
            // Left by a run that was killed; the kernel already dropped its lock.
            tracing::warn!(path = %path.display(), stale_pid = previous, "previous sync did not exit cleanly");
        }
        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_holder()?;
        tracing::debug!(path = %path.display(), pid = std::process::id(), "sync lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly. Dropping the guard has the same effect.
    pub fn release(self) {}

    fn write_holder(&self) -> Result<(), LockError> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let json = serde_json::to_string(&content)
            .map_err(|e| lock_io_err(&self.path, std::io::Error::other(e)))?;
        overwrite(&self.file, json.as_bytes()).map_err(|e| lock_io_err(&self.path, e))
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        // The file stays; only the holder record is cleared.
        if let Err(err) = self.file.set_len(0) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to clear sync lock holder");
        }
        // Closing the file drops the lock too.
        let _ = self.file.unlock();
        tracing::debug!(path = %self.path.display(), "sync lock released");
    }
}

fn overwrite(mut file: &File, bytes: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// PID recorded in the lock file; `None` when the file is gone, empty or
/// unreadable.
fn read_holder(path: &Path) -> Result<Option<u32>, LockError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(lock_io_err(path, err)),
    };
    // Accept a bare PID as written by older shell tooling.
    if let Ok(pid) = contents.trim().parse::<u32>() {
        return Ok(Some(pid));
    }
    Ok(serde_json::from_str::<LockContent>(&contents)
        .ok()
        .map(|content| content.pid))
}
