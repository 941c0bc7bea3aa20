//! LVM copy-on-write snapshots.
//!
//! A merge back into the origin volume only completes on its next
//! activation, so rollback reports a scheduled restore rather than a
//! finished one.

use fleetsync_core::{CommandRunner, CommandSpec};

use crate::backend::run_checked;
use crate::error::SnapshotError;

/// Returns the locator `vg/name`.
pub fn create(
    runner: &dyn CommandRunner,
    vg: &str,
    lv: &str,
    name: &str,
    size: &str,
) -> Result<String, SnapshotError> {
    let origin = format!("{vg}/{lv}");
    run_checked(
        runner,
        CommandSpec::new("lvcreate").args(["-s", "-n", name, "-L", size, origin.as_str()]),
    )?;
    Ok(format!("{vg}/{name}"))
}

/// Schedules the merge and returns a human-readable explanation.
pub fn rollback(runner: &dyn CommandRunner, locator: &str) -> Result<String, SnapshotError> {
    let output = run_checked(runner, CommandSpec::new("lvconvert").args(["--merge", locator]))?;
    let mut detail = format!(
        "merge of {locator} scheduled; it completes when the origin volume is next activated (reboot required)"
    );
    if let Some(line) = output.stdout.lines().rev().find(|l| !l.trim().is_empty()) {
        detail.push_str(": ");
        detail.push_str(line.trim());
    }
    Ok(detail)
}

pub fn destroy(runner: &dyn CommandRunner, locator: &str) -> Result<(), SnapshotError> {
    run_checked(runner, CommandSpec::new("lvremove").args(["-f", locator]))?;
    Ok(())
}
