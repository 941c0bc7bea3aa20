//! On-disk layout of the agent's state directory.
//!
//! ```text
//! /var/lib/fleetsync/
//!   sync.lock                 PID lock (present only while a run is active)
//!   last_sync                 RFC 3339 timestamp of the last successful run
//!   conflict.marker           JSON; blocks runs until `fleetsync resolve`
//!   conflicts.log             JSON lines, one entry per detected conflict
//!   snapshot.pointer          name of the most recently created snapshot
//!   helpers.sh                shell helper library for setup scripts
//!   checksums/
//!     baseline.json
//!     current.json
//!   snapshots/
//!     index.json
//!     <name>/                 file-level backend captures
//!   repo/                     cached git checkout
//! ```

use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_DIR: &str = "/var/lib/fleetsync";

/// Resolves every persisted-state path from a single root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("sync.lock")
    }

    pub fn last_sync_path(&self) -> PathBuf {
        self.root.join("last_sync")
    }

    pub fn conflict_marker_path(&self) -> PathBuf {
        self.root.join("conflict.marker")
    }

    pub fn conflict_log_path(&self) -> PathBuf {
        self.root.join("conflicts.log")
    }

    pub fn snapshot_pointer_path(&self) -> PathBuf {
        self.root.join("snapshot.pointer")
    }

    pub fn default_helper_path(&self) -> PathBuf {
        self.root.join("helpers.sh")
    }

    pub fn checksums_dir(&self) -> PathBuf {
        self.root.join("checksums")
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.checksums_dir().join("baseline.json")
    }

    pub fn current_path(&self) -> PathBuf {
        self.checksums_dir().join("current.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn snapshot_index_path(&self) -> PathBuf {
        self.snapshots_dir().join("index.json")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Small state files captured by the file-level snapshot backend.
    pub fn internal_state_files(&self) -> Vec<PathBuf> {
        vec![
            self.baseline_path(),
            self.last_sync_path(),
            self.conflict_marker_path(),
        ]
    }
}

impl Default for StateLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}
