//! fleetsync core library: configuration, domain types, persisted state,
//! the single-run lock, and the external-command seam.
//!
//! - [`config`]: `KEY=value` agent configuration
//! - [`types`]: policies, checksums, conflicts, snapshot records
//! - [`state`]: [`StateStore`] with file-backed and in-memory implementations
//! - [`lock`]: advisory-locked [`SyncLock`]
//! - [`layout`]: state directory paths
//! - [`exec`]: [`CommandRunner`] and its implementations

pub mod config;
pub mod error;
pub mod exec;
pub mod layout;
pub mod lock;
pub mod state;
pub mod types;

pub use config::{BackendChoice, Config, SnapshotMode, SnapshotSettings};
pub use error::{ConfigError, ExecError, LockError, StateError};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ScriptedRunner, SystemRunner};
pub use layout::StateLayout;
pub use lock::SyncLock;
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{
    BackendKind, ChecksumGeneration, ChecksumTable, ConflictMarker, ConflictRecord, FileChecksum,
    Policy, SnapshotRecord,
};
