//! `fleetsync restore <name>`: roll back and clear conflict state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fleetsync_core::{ChecksumGeneration, SnapshotSettings, StateStore, SystemRunner};
use fleetsync_snapshot::{RollbackOutcome, SnapshotManager};

use crate::commands::{confirm, lock};
use crate::Globals;

/// Arguments for `fleetsync restore`.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Snapshot to roll back to.
    pub name: String,

    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl RestoreArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let _lock = lock(globals)?;
        let mut store = globals.store();
        let runner = SystemRunner;
        let manager = SnapshotManager::new(&runner, SnapshotSettings::default(), &globals.layout);
        let details = manager
            .show(&store, &self.name)
            .with_context(|| format!("cannot restore snapshot '{}'", self.name))?;

        if !self.yes {
            let question = format!(
                "Roll back to {} ({}, taken {})?",
                details.record.tagged_name(),
                details.record.backend,
                details.record.created_at.to_rfc3339()
            );
            if !confirm(&question)? {
                println!("Aborted.");
                return Ok(1);
            }
        }

        let outcome = manager
            .rollback(&store, &details.record.name)
            .with_context(|| format!("rollback to '{}' failed", details.record.name))?;
        store
            .clear_conflict_marker()
            .context("failed to clear conflict marker")?;
        store
            .clear_checksums(ChecksumGeneration::Current)
            .context("failed to clear current checksums")?;
        tracing::info!(snapshot = %details.record.name, outcome = ?outcome, "restore finished");

        match outcome {
            RollbackOutcome::Restored => {
                println!("{} restored {}", "✓".green().bold(), details.record.name)
            }
            RollbackOutcome::Scheduled { detail } => {
                println!(
                    "{} rollback to {} scheduled; it completes when the volume is next activated",
                    "~".yellow().bold(),
                    details.record.name
                );
                if !detail.is_empty() {
                    println!("  {detail}");
                }
            }
            RollbackOutcome::ManualRecovery { steps } => {
                println!(
                    "{} a restore copy of {} was prepared; finish manually:",
                    "!".yellow().bold(),
                    details.record.name
                );
                for (n, step) in steps.iter().enumerate() {
                    println!("  {}. {step}", n + 1);
                }
            }
        }
        Ok(0)
    }
}
