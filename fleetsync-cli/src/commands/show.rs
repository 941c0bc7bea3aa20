//! `fleetsync show <name>`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fleetsync_core::{SnapshotSettings, SystemRunner};
use fleetsync_snapshot::SnapshotManager;
use fleetsync_sync::conflict::format_datetime_age;

use crate::Globals;

/// Arguments for `fleetsync show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Snapshot name, with or without the `:good` tag.
    pub name: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ManifestRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "captured")]
    captured: String,
    #[tabled(rename = "mode")]
    mode: String,
}

impl ShowArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let store = globals.store();
        let runner = SystemRunner;
        let manager = SnapshotManager::new(&runner, SnapshotSettings::default(), &globals.layout);
        let details = manager
            .show(&store, &self.name)
            .with_context(|| format!("cannot show snapshot '{}'", self.name))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&details).context("failed to serialize snapshot")?
            );
            return Ok(0);
        }

        let record = &details.record;
        println!("{}", record.tagged_name().bold());
        println!("  backend   {}", record.backend);
        println!(
            "  created   {} ({} ago)",
            record.created_at.to_rfc3339(),
            format_datetime_age(record.created_at)
        );
        println!(
            "  verified  {}",
            if record.good {
                "yes, taken before a successful run".green().to_string()
            } else {
                "no".yellow().to_string()
            }
        );
        println!("  locator   {}", record.locator);
        if details.pointer {
            println!("  latest    yes");
        }

        if let Some(manifest) = details.manifest {
            println!("  files     {}", manifest.len());
            let rows: Vec<ManifestRow> = manifest
                .into_iter()
                .map(|entry| ManifestRow {
                    path: entry.original.display().to_string(),
                    captured: if entry.existed {
                        "copy".to_string()
                    } else {
                        "absent".to_string()
                    },
                    mode: entry.mode.map(|m| format!("{:o}", m & 0o7777)).unwrap_or_default(),
                })
                .collect();
            if !rows.is_empty() {
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
        }
        Ok(0)
    }
}
