//! `fleetsync resolve`: accept what is on disk and unblock syncing.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fleetsync_core::{ChecksumGeneration, StateStore};
use fleetsync_detector::HostProbe;
use fleetsync_sync::{conflict, managed_files};

use crate::commands::{confirm, lock};
use crate::Globals;

/// Arguments for `fleetsync resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl ResolveArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let config = globals.load_config()?;
        let _lock = lock(globals)?;
        let mut store = globals.store();
        let marker = store.conflict_marker().context("failed to read conflict marker")?;

        if !self.yes {
            let question = match &marker {
                Some(marker) => format!(
                    "Keep the on-disk version of {} conflicting file(s) and re-baseline?",
                    marker.paths.len()
                ),
                None => "No conflicts recorded. Re-baseline to the on-disk state anyway?".to_string(),
            };
            if !confirm(&question)? {
                println!("Aborted.");
                return Ok(1);
            }
        }

        let discovered = managed_files(&config, &globals.layout, &HostProbe::system())
            .context("failed to read managed files")?;
        let baseline = store
            .load_checksums(ChecksumGeneration::Baseline)
            .context("failed to read baseline")?;
        let mut targets = conflict::managed_targets(baseline.as_ref(), &discovered.files);
        if let Some(marker) = &marker {
            targets.extend(marker.paths.iter().cloned());
        }
        let table = conflict::resolve(&mut store, &targets).context("failed to re-baseline")?;

        println!(
            "{} baseline reset to on-disk state ({} files); next sync will proceed",
            "✓".green().bold(),
            table.len()
        );
        Ok(0)
    }
}
