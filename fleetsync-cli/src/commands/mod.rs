pub mod list;
pub mod resolve;
pub mod restore;
pub mod show;
pub mod status;
pub mod sync;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use fleetsync_core::SyncLock;

use crate::Globals;

/// Ask on stdout, read one line from stdin. Only `y`/`yes` proceed; EOF
/// counts as no.
pub fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

/// Operator commands that change state run under the sync lock too.
pub fn lock(globals: &Globals) -> Result<SyncLock> {
    SyncLock::acquire(&globals.layout.lock_path())
        .context("another fleetsync run is in progress")
}
