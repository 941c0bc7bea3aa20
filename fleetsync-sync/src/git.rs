//! Repository cache maintenance through the `git` executable.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use fleetsync_core::{CommandRunner, CommandSpec};

use crate::error::{io_err, SyncError};

/// What happened to the cached checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RepoSync {
    /// First run: fresh clone.
    Cloned,
    /// Fetched and hard-reset to the tracked branch.
    Updated,
    /// Update failed; the previous checkout is used as-is.
    Cached { reason: String },
}

pub fn has_checkout(cache: &Path) -> bool {
    cache.join(".git").exists()
}

/// Clone on first run, otherwise fetch and reset to `origin/<branch>`.
///
/// A failed first clone is fatal ([`SyncError::GitNoCache`]). A failed
/// update only degrades to the cached state.
pub fn sync_repo(
    runner: &dyn CommandRunner,
    url: &str,
    branch: &str,
    cache: &Path,
) -> Result<RepoSync, SyncError> {
    if !has_checkout(cache) {
        clone(runner, url, branch, cache)?;
        tracing::info!(%url, %branch, cache = %cache.display(), "repository cloned");
        return Ok(RepoSync::Cloned);
    }

    let steps = [
        CommandSpec::new("git").args(["fetch", "origin", branch]),
        CommandSpec::new("git").args(["reset", "--hard", "FETCH_HEAD"]),
        CommandSpec::new("git").args(["clean", "-fd"]),
    ];
    for step in steps {
        let step = step.current_dir(cache);
        let reason = match runner.run(&step) {
            Ok(out) if out.success() => continue,
            Ok(out) => out.summary(),
            Err(err) => err.to_string(),
        };
        tracing::warn!(command = %step, %reason, "repository update failed; continuing with cached checkout");
        return Ok(RepoSync::Cached { reason });
    }
    tracing::info!(%branch, "repository updated");
    Ok(RepoSync::Updated)
}

fn clone(runner: &dyn CommandRunner, url: &str, branch: &str, cache: &Path) -> Result<(), SyncError> {
    // Leftovers of an interrupted clone would make git refuse the target.
    match fs::remove_dir_all(cache) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(cache, err)),
    }
    if let Some(parent) = cache.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let target = cache.to_string_lossy();
    let spec = CommandSpec::new("git").args([
        "clone",
        "--branch",
        branch,
        "--single-branch",
        url,
        &*target,
    ]);
    let message = match runner.run(&spec) {
        Ok(out) if out.success() => return Ok(()),
        Ok(out) => out.summary(),
        Err(err) => err.to_string(),
    };
    tracing::error!(%url, %message, "initial clone failed");
    Err(SyncError::GitNoCache {
        url: url.to_string(),
        message,
    })
}
