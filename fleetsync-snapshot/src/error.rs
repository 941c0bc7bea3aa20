//! Error types for fleetsync-snapshot.

use std::path::PathBuf;

use thiserror::Error;

use fleetsync_core::{ExecError, StateError};

/// All errors that can arise from snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A snapshot tool could not be spawned.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The snapshot index or pointer could not be read or written.
    #[error("snapshot index error: {0}")]
    State(#[from] StateError),

    /// A snapshot tool ran and reported failure.
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("no snapshot named '{name}'")]
    NotFound { name: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file-level manifest or metadata document is unreadable.
    #[error("invalid snapshot document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience constructor for [`SnapshotError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.into(),
        source,
    }
}
