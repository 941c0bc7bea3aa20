//! # fleetsync-snapshot
//!
//! Pre-sync snapshots and rollback.
//!
//! [`SnapshotManager`] picks the best backend the root filesystem supports
//! (ZFS, then LVM, then BTRFS) and falls back to copying managed files into
//! the state directory when none is available. Snapshots are recorded in the
//! index kept by the [`StateStore`](fleetsync_core::StateStore).

pub mod backend;
pub mod btrfs;
pub mod error;
pub mod file;
pub mod lvm;
pub mod manager;
pub mod zfs;

pub use backend::{detect_backend, parse_root_mount, RootMount, SnapshotBackend};
pub use error::SnapshotError;
pub use file::{ManifestEntry, SnapshotMetadata};
pub use manager::{RollbackOutcome, SnapshotDetails, SnapshotManager};
