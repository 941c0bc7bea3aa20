//! fleetsync: git-driven configuration sync for containers.
//!
//! # Usage
//!
//! ```text
//! fleetsync [--config <path>] [--state-dir <path>] sync
//! fleetsync list [--json]
//! fleetsync status [--json] [--diff]
//! fleetsync show <name>
//! fleetsync restore <name> [--yes]
//! fleetsync resolve [--yes]
//! ```

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    list::ListArgs, resolve::ResolveArgs, restore::RestoreArgs, show::ShowArgs,
    status::StatusArgs, sync::SyncArgs,
};
use fleetsync_core::{
    config::DEFAULT_CONFIG_PATH, layout::DEFAULT_STATE_DIR, Config, ConfigError, FileStateStore,
    LockError, StateLayout,
};
use fleetsync_sync::{exit_code, SyncError};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleetsync",
    version,
    about = "Bring a container to the state described by a git repository",
    long_about = None,
)]
struct Cli {
    /// Agent configuration file.
    #[arg(long, global = true, env = "FLEETSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding checksums, snapshots and the cached checkout.
    #[arg(long, global = true, env = "FLEETSYNC_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync (what the service unit invokes at boot).
    Sync(SyncArgs),

    /// List snapshots.
    List(ListArgs),

    /// Show last sync, conflict state and per-file status.
    Status(StatusArgs),

    /// Show one snapshot, with its manifest for file-level snapshots.
    Show(ShowArgs),

    /// Roll back to a snapshot and clear conflict state.
    Restore(RestoreArgs),

    /// Accept the current on-disk state as the new baseline.
    Resolve(ResolveArgs),
}

impl Commands {
    /// Commands that change host or state get the file log and `info` on stderr.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Sync(_) | Commands::Restore(_) | Commands::Resolve(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Paths every subcommand resolves from the global flags.
#[derive(Debug, Clone)]
pub struct Globals {
    pub config_path: PathBuf,
    pub layout: StateLayout,
}

impl Globals {
    pub fn store(&self) -> FileStateStore {
        FileStateStore::new(self.layout.clone())
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::load(&self.config_path)
            .with_context(|| format!("cannot load {}", self.config_path.display()))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    let globals = Globals {
        config_path: cli.config,
        layout: StateLayout::new(cli.state_dir),
    };
    logging::init(&globals.config_path, cli.command.mutates());

    let result = match cli.command {
        Commands::Sync(args) => args.run(&globals),
        Commands::List(args) => args.run(&globals),
        Commands::Status(args) => args.run(&globals),
        Commands::Show(args) => args.run(&globals),
        Commands::Restore(args) => args.run(&globals),
        Commands::Resolve(args) => args.run(&globals),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Map an error chain onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(sync) = cause.downcast_ref::<SyncError>() {
            return sync.exit_code();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG;
        }
        if let Some(LockError::Held { .. }) = cause.downcast_ref::<LockError>() {
            return exit_code::LOCK_HELD;
        }
    }
    exit_code::FAILURE
}
