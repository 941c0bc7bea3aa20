//! `fleetsync sync`: one oneshot run.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use fleetsync_core::SystemRunner;
use fleetsync_detector::HostProbe;
use fleetsync_sync::{
    deploy::FileAction, git::RepoSync, Orchestrator, SyncOutcome, SyncReport,
};

use crate::Globals;

/// Arguments for `fleetsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {}

impl SyncArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let runner = SystemRunner;
        let mut store = globals.store();
        let report = Orchestrator::new(
            &runner,
            &mut store,
            globals.layout.clone(),
            HostProbe::system(),
            globals.config_path.clone(),
        )
        .run();
        print_report(&report);
        Ok(report.exit_code())
    }
}

fn print_report(report: &SyncReport) {
    match report.outcome {
        SyncOutcome::Success => println!("{} sync complete", "✓".green().bold()),
        SyncOutcome::Conflict => {
            println!("{} sync blocked by conflicts", "✗".red().bold());
            let paths: Vec<String> = match &report.blocked_by {
                Some(marker) => marker.paths.clone(),
                None => report.conflicts.iter().map(|c| c.path.clone()).collect(),
            };
            for path in paths {
                println!("  !  {path}");
            }
            println!("Inspect with 'fleetsync status --diff', then 'fleetsync resolve' or 'fleetsync restore <snapshot>'.");
            return;
        }
        SyncOutcome::Error => {
            let reason = report
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            println!("{} sync failed: {reason}", "✗".red().bold());
        }
    }

    if let Some(snapshot) = &report.snapshot {
        println!("  snapshot  {} ({})", snapshot.name, snapshot.backend);
    }
    match &report.repo {
        Some(RepoSync::Cloned) => println!("  repo      cloned"),
        Some(RepoSync::Updated) => println!("  repo      updated"),
        Some(RepoSync::Cached { reason }) => {
            println!("  repo      {} ({reason})", "using cached checkout".yellow())
        }
        None => {}
    }
    if let Some(scripts) = &report.scripts {
        println!("  scripts   {} ran", scripts.executed.len());
        if let Some(failure) = &scripts.failed_at {
            println!("    ✗  {}: {}", failure.script, failure.message);
            for skipped in &scripts.skipped {
                println!("    ·  {skipped} (not run)");
            }
        }
    }
    if let Some(files) = &report.files {
        println!(
            "  files     {} written, {} skipped, {} failed",
            files.deployed(),
            files.skipped(),
            files.errored()
        );
        for result in &files.results {
            let target = result
                .target
                .as_ref()
                .map_or_else(|| result.name.clone(), |t| t.display().to_string());
            match &result.action {
                FileAction::Created | FileAction::Replaced => println!("    ✎  {target}"),
                FileAction::BackedUp { backup } => {
                    println!("    ✎  {target} (previous kept at {})", backup.display())
                }
                FileAction::Failed { reason } => println!("    ✗  {target}: {reason}"),
                FileAction::Unchanged | FileAction::KeptExisting => {}
            }
        }
    }
    for pkgs in &report.packages {
        println!(
            "  {:<9} {} installed, {} present, {} failed",
            pkgs.manager,
            pkgs.installed.len(),
            pkgs.skipped.len(),
            pkgs.failed.len()
        );
        for failure in &pkgs.failed {
            println!("    ✗  {}: {}", failure.name, failure.reason);
        }
    }
}
