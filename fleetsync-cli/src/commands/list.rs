//! `fleetsync list`: snapshots, oldest first.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleetsync_core::{BackendKind, SnapshotSettings, StateStore, SystemRunner};
use fleetsync_snapshot::SnapshotManager;
use fleetsync_sync::conflict::format_datetime_age;

use crate::Globals;

/// Arguments for `fleetsync list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct SnapshotJson {
    name: String,
    backend: BackendKind,
    created_at: String,
    good: bool,
    latest: bool,
    locator: String,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "backend")]
    backend: String,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "good")]
    good: String,
    #[tabled(rename = "latest")]
    latest: String,
}

impl ListArgs {
    pub fn run(self, globals: &Globals) -> Result<u8> {
        let store = globals.store();
        let runner = SystemRunner;
        let manager = SnapshotManager::new(&runner, SnapshotSettings::default(), &globals.layout);
        let snapshots = manager.list(&store).context("failed to read snapshot index")?;
        let pointer = store
            .snapshot_pointer()
            .context("failed to read snapshot pointer")?;
        let is_latest = |name: &str| pointer.as_deref() == Some(name);

        if self.json {
            let payload: Vec<SnapshotJson> = snapshots
                .iter()
                .map(|s| SnapshotJson {
                    name: s.name.clone(),
                    backend: s.backend,
                    created_at: s.created_at.to_rfc3339(),
                    good: s.good,
                    latest: is_latest(&s.name),
                    locator: s.locator.clone(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize snapshot list")?
            );
            return Ok(0);
        }

        if snapshots.is_empty() {
            println!("No snapshots.");
            return Ok(0);
        }
        let rows: Vec<SnapshotRow> = snapshots
            .iter()
            .map(|s| SnapshotRow {
                name: s.tagged_name(),
                backend: s.backend.to_string(),
                age: format_datetime_age(s.created_at),
                good: if s.good {
                    "✓".green().to_string()
                } else {
                    "·".bright_black().to_string()
                },
                latest: if is_latest(&s.name) { "*".to_string() } else { String::new() },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(0)
    }
}
