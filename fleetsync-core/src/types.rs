//! Domain types shared by every fleetsync crate.
//!
//! All types that reach disk are serde-serializable; the file-backed state
//! store persists them as JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Deployment policy
// ---------------------------------------------------------------------------

/// How a managed file is written when its target already exists with
/// different content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Overwrite unconditionally.
    Replace,
    /// Create only when absent; never touch an existing target.
    #[default]
    Default,
    /// Move the existing target aside to `<target>.backup-<timestamp>`, then write.
    Backup,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Replace => write!(f, "replace"),
            Policy::Default => write!(f, "default"),
            Policy::Backup => write!(f, "backup"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "replace" => Ok(Policy::Replace),
            "default" => Ok(Policy::Default),
            "backup" => Ok(Policy::Backup),
            other => Err(format!(
                "unknown policy '{other}'; expected: replace, default, backup"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Checksum state of a single file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChecksum {
    /// SHA-256 hex digest of the file content.
    Present(String),
    /// The file does not exist.
    Missing,
    /// The file exists but could not be read.
    Unreadable,
}

impl FileChecksum {
    pub fn digest(&self) -> Option<&str> {
        match self {
            FileChecksum::Present(digest) => Some(digest),
            _ => None,
        }
    }
}

impl fmt::Display for FileChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileChecksum::Present(digest) => write!(f, "{digest}"),
            FileChecksum::Missing => write!(f, "missing"),
            FileChecksum::Unreadable => write!(f, "unreadable"),
        }
    }
}

/// Checksums keyed by absolute target path.
pub type ChecksumTable = BTreeMap<String, FileChecksum>;

/// Which persisted checksum table to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumGeneration {
    /// Saved after the last fully successful run.
    Baseline,
    /// Captured before this run's repository update.
    Current,
}

impl fmt::Display for ChecksumGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumGeneration::Baseline => write!(f, "baseline"),
            ChecksumGeneration::Current => write!(f, "current"),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// One file changed both in the repository and on disk since the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub path: String,
    pub baseline: FileChecksum,
    pub current: FileChecksum,
    pub incoming: FileChecksum,
    pub detected_at: DateTime<Utc>,
}

/// Blocks every future run until an operator clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    pub created_at: DateTime<Utc>,
    pub paths: Vec<String>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Snapshot mechanism used for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Zfs,
    Lvm,
    Btrfs,
    /// Managed-files-only copy under the state directory.
    File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Zfs => write!(f, "zfs"),
            BackendKind::Lvm => write!(f, "lvm"),
            BackendKind::Btrfs => write!(f, "btrfs"),
            BackendKind::File => write!(f, "file"),
        }
    }
}

/// Index entry for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// `<prefix>-<YYYYmmdd-HHMMSS>`, unique within the index.
    pub name: String,
    pub backend: BackendKind,
    pub created_at: DateTime<Utc>,
    /// Set only after a fully successful run.
    #[serde(default)]
    pub good: bool,
    /// Backend-native handle: `pool/ds@name`, `vg/name`, a subvolume path, or
    /// the backup directory.
    pub locator: String,
}

impl SnapshotRecord {
    /// Display name with the `:good` tag appended when verified.
    pub fn tagged_name(&self) -> String {
        if self.good {
            format!("{}:good", self.name)
        } else {
            self.name.clone()
        }
    }
}
