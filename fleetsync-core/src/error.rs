//! Error types for fleetsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the agent configuration.
///
/// Every variant is fatal for a sync run: the orchestrator stops before any
/// mutation happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found at {path}")]
    NotFound { path: PathBuf },

    /// The configuration file exists but could not be read.
    #[error("I/O error reading configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A non-comment line is not of the form `KEY=value`.
    #[error("{path}:{line}: malformed line '{content}' (expected KEY=value)")]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// A required key is absent or empty.
    #[error("missing required configuration key {key}")]
    MissingKey { key: &'static str },

    /// A key is present but its value fails validation.
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Errors from the persisted state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON state file exists but does not parse.
    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A plain-text state file (timestamp, pointer) holds an unexpected value.
    #[error("corrupt state file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Errors from the single-run PID lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("another sync is running (pid {pid}, lock {path})")]
    Held { pid: u32, path: PathBuf },

    #[error("I/O error at lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from spawning or supervising an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be started at all (not found, not executable).
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child started but waiting on it or collecting its output failed.
    #[error("failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn state_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn lock_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.into(),
        source,
    }
}
