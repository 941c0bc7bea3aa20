//! # fleetsync-sync
//!
//! One sync run: pull the configuration repository, refuse to overwrite
//! local edits that collide with incoming changes, then run scripts,
//! deploy files and install packages.
//!
//! Build an [`Orchestrator`] and call [`Orchestrator::run`]. The returned
//! [`SyncReport`] carries the process exit code.

pub mod checksum;
pub mod conflict;
pub mod deploy;
pub mod diff;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod packages;
pub mod scripts;
pub mod triplet;

pub use conflict::{FileState, FileStatus};
pub use error::{exit_code, SyncError};
pub use orchestrator::{config_root, managed_files, Orchestrator, SyncOutcome, SyncReport};
pub use triplet::{Discovered, ManagedFile};
