//! Read-only BTRFS subvolume snapshots under `<mount>/.snapshots/`.
//!
//! A mounted root subvolume cannot be swapped in place, so rollback only
//! prepares a writable copy and hands the operator the remaining steps.

use std::fs;
use std::path::Path;

use fleetsync_core::{CommandRunner, CommandSpec};

use crate::backend::run_checked;
use crate::error::{io_err, SnapshotError};

pub const SNAPSHOT_SUBDIR: &str = ".snapshots";

/// Returns the locator: the snapshot subvolume path.
pub fn create(runner: &dyn CommandRunner, mount: &Path, name: &str) -> Result<String, SnapshotError> {
    let dir = mount.join(SNAPSHOT_SUBDIR);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let target = dir.join(name);
    let target_str = target.to_string_lossy().into_owned();
    let mount_str = mount.to_string_lossy().into_owned();
    run_checked(
        runner,
        CommandSpec::new("btrfs").args(["subvolume", "snapshot", "-r", mount_str.as_str(), target_str.as_str()]),
    )?;
    Ok(target_str)
}

/// Create `<locator>-restore` as a writable copy and return recovery steps.
pub fn prepare_restore(runner: &dyn CommandRunner, locator: &str) -> Result<Vec<String>, SnapshotError> {
    let restore = format!("{locator}-restore");
    run_checked(
        runner,
        CommandSpec::new("btrfs").args(["subvolume", "snapshot", locator, restore.as_str()]),
    )?;
    Ok(vec![
        format!("A writable copy of the snapshot was created at {restore}"),
        "Boot into a rescue or live environment and mount the top-level BTRFS volume".to_string(),
        format!("Move the current root subvolume aside and rename {restore} into its place (or point `btrfs subvolume set-default` at it)"),
        "Reboot, then delete the old root subvolume once the system is verified".to_string(),
    ])
}

pub fn destroy(runner: &dyn CommandRunner, locator: &str) -> Result<(), SnapshotError> {
    run_checked(runner, CommandSpec::new("btrfs").args(["subvolume", "delete", locator]))?;
    Ok(())
}
