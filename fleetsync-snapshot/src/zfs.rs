//! ZFS snapshots: `<dataset>@<name>`.

use fleetsync_core::{CommandRunner, CommandSpec};

use crate::backend::run_checked;
use crate::error::SnapshotError;

/// Returns the locator `dataset@name`.
pub fn create(runner: &dyn CommandRunner, dataset: &str, name: &str) -> Result<String, SnapshotError> {
    let locator = format!("{dataset}@{name}");
    run_checked(runner, CommandSpec::new("zfs").args(["snapshot", locator.as_str()]))?;
    Ok(locator)
}

/// `-r` destroys any later snapshots, which is what a rollback to an older
/// pre-sync state means.
pub fn rollback(runner: &dyn CommandRunner, locator: &str) -> Result<(), SnapshotError> {
    run_checked(runner, CommandSpec::new("zfs").args(["rollback", "-r", locator]))?;
    Ok(())
}

pub fn destroy(runner: &dyn CommandRunner, locator: &str) -> Result<(), SnapshotError> {
    run_checked(runner, CommandSpec::new("zfs").args(["destroy", locator]))?;
    Ok(())
}
