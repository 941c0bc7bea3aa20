//! Error types for fleetsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use fleetsync_core::{ConfigError, ExecError, LockError, StateError};
use fleetsync_detector::DetectError;
use fleetsync_snapshot::SnapshotError;

/// Process exit codes of a sync run.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const LOCK_HELD: u8 = 2;
    pub const CONFIG: u8 = 3;
    pub const GIT_NO_CACHE: u8 = 4;
    pub const CONFLICT: u8 = 5;
}

/// All errors that can end a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("host detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// First clone failed and there is no cached checkout to fall back on.
    #[error("cannot clone {url} and no cached checkout exists: {message}")]
    GitNoCache { url: String, message: String },

    /// A script exited non-zero; the remaining chain was not run.
    #[error("script {script} failed: {message}")]
    ScriptFailed { script: String, message: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Lock(LockError::Held { .. }) => exit_code::LOCK_HELD,
            SyncError::Config(_) => exit_code::CONFIG,
            // Configured CONTAINER_USER that does not exist.
            SyncError::Detect(DetectError::UnknownUser { .. }) => exit_code::CONFIG,
            SyncError::GitNoCache { .. } => exit_code::GIT_NO_CACHE,
            _ => exit_code::FAILURE,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
