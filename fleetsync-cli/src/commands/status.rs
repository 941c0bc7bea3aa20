//! `fleetsync status`: last sync, conflict state and per-file status.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleetsync_core::{ConflictMarker, StateStore};
use fleetsync_detector::HostProbe;
use fleetsync_sync::{
    conflict::{self, format_datetime_age},
    diff::{self, FileDiff},
    exit_code, managed_files, FileState, FileStatus,
};

use crate::Globals;

/// Arguments for `fleetsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Print unified diffs (on disk vs. repository) for conflicting files.
    #[arg(long)]
    pub diff: bool,
}

#[derive(Serialize)]
struct StatusJson {
    last_sync: Option<String>,
    conflict_marker: Option<ConflictMarker>,
    invalid_triplets: Vec<String>,
    files: Vec<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diffs: Option<Vec<FileDiff>>,
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "file")]
    path: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "repo update")]
    update: String,
}

impl StatusArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let config = globals.load_config()?;
        let store = globals.store();
        let last_sync = store.last_sync().context("failed to read last sync time")?;
        let marker = store.conflict_marker().context("failed to read conflict marker")?;
        let discovered = managed_files(&config, &globals.layout, &HostProbe::system())
            .context("failed to read managed files")?;
        let files = conflict::status(&store, &discovered.files)
            .context("failed to compute file status")?;
        let diffs = if self.diff {
            Some(diff::conflict_diffs(&files, &discovered.files).context("failed to build diffs")?)
        } else {
            None
        };
        let code = if marker.is_some() {
            exit_code::CONFLICT
        } else {
            exit_code::SUCCESS
        };

        if self.json {
            let payload = StatusJson {
                last_sync: last_sync.map(|t| t.to_rfc3339()),
                conflict_marker: marker,
                invalid_triplets: discovered
                    .invalid
                    .iter()
                    .map(|i| format!("{}: {}", i.name, i.reason))
                    .collect(),
                files,
                diffs,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(code);
        }

        let last = last_sync.map_or_else(
            || "never".to_string(),
            |t| format!("{} ago ({})", format_datetime_age(t), t.to_rfc3339()),
        );
        println!("fleetsync v{} | last sync: {last}", env!("CARGO_PKG_VERSION"));

        match &marker {
            Some(marker) => {
                println!(
                    "{} conflicts recorded {} ago; syncing is blocked",
                    "✗".red().bold(),
                    format_datetime_age(marker.created_at)
                );
                for path in &marker.paths {
                    println!("  !  {path}");
                }
            }
            None => println!("{} no unresolved conflicts", "✓".green().bold()),
        }
        for invalid in &discovered.invalid {
            println!("{} {}: {}", "!".yellow().bold(), invalid.name, invalid.reason);
        }

        if files.is_empty() {
            println!("No managed files.");
        } else {
            let rows: Vec<FileRow> = files
                .iter()
                .map(|f| FileRow {
                    path: f.path.clone(),
                    status: state_label(f.state),
                    update: if f.update_pending { "pending".to_string() } else { String::new() },
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }

        if let Some(diffs) = diffs {
            for diff in diffs {
                print!("{}", diff.unified_diff);
                if !diff.unified_diff.ends_with('\n') {
                    println!();
                }
            }
        }

        if marker.is_some() {
            println!("Run 'fleetsync resolve' to keep local files, or 'fleetsync restore <snapshot>'.");
        }
        Ok(code)
    }
}

fn state_label(state: FileState) -> String {
    match state {
        FileState::Clean => "CLEAN".green().to_string(),
        FileState::LocallyModified => "LOCALLY MODIFIED".yellow().to_string(),
        FileState::Conflicting => "CONFLICTING".red().bold().to_string(),
    }
}
