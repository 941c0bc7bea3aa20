//! Backend selection.
//!
//! The root mount is read with `findmnt -n -o FSTYPE,SOURCE /`. Priority is
//! ZFS > LVM > BTRFS; the file-level fallback is always available. A pinned
//! `SNAPSHOT_BACKEND` that the host cannot honour degrades to the fallback.

use std::path::PathBuf;

use fleetsync_core::{BackendChoice, BackendKind, CommandOutput, CommandRunner, CommandSpec};

use crate::error::SnapshotError;

/// Backend chosen for new snapshots, with what it needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotBackend {
    /// Root is a ZFS dataset.
    Zfs { dataset: String },
    /// Root is a logical volume.
    Lvm { vg: String, lv: String },
    /// Root is a BTRFS subvolume mounted at `mount`.
    Btrfs { mount: PathBuf },
    /// Copies of managed files under the state directory.
    FileFallback,
}

impl SnapshotBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            SnapshotBackend::Zfs { .. } => BackendKind::Zfs,
            SnapshotBackend::Lvm { .. } => BackendKind::Lvm,
            SnapshotBackend::Btrfs { .. } => BackendKind::Btrfs,
            SnapshotBackend::FileFallback => BackendKind::File,
        }
    }
}

/// Filesystem type and source device of `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMount {
    pub fstype: String,
    pub source: String,
}

impl RootMount {
    /// Source without a BTRFS subvolume suffix (`/dev/sda2[/@]` -> `/dev/sda2`).
    pub fn device(&self) -> &str {
        match self.source.find('[') {
            Some(idx) => &self.source[..idx],
            None => &self.source,
        }
    }
}

/// Parse `findmnt -n -o FSTYPE,SOURCE /` output.
pub fn parse_root_mount(output: &str) -> Option<RootMount> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    let fstype = fields.next()?.to_string();
    let source = fields.next()?.to_string();
    Some(RootMount { fstype, source })
}

/// Choose the backend for new snapshots. Never fails; every probe failure
/// falls through to [`SnapshotBackend::FileFallback`].
pub fn detect_backend(runner: &dyn CommandRunner, choice: BackendChoice) -> SnapshotBackend {
    if choice == BackendChoice::None {
        return SnapshotBackend::FileFallback;
    }

    let mount = run_quiet(runner, CommandSpec::new("findmnt").args(["-n", "-o", "FSTYPE,SOURCE", "/"]))
        .and_then(|out| parse_root_mount(&out.stdout));
    let Some(mount) = mount else {
        tracing::warn!("could not determine root filesystem; using file-level snapshots");
        return SnapshotBackend::FileFallback;
    };
    tracing::debug!(fstype = %mount.fstype, source = %mount.source, "root mount");

    let wants = |kind: BackendChoice| choice == BackendChoice::Auto || choice == kind;

    if wants(BackendChoice::Zfs) && mount.fstype == "zfs" {
        let probe = CommandSpec::new("zfs").args(["list", "-H", "-o", "name", mount.source.as_str()]);
        if run_quiet(runner, probe).is_some() {
            return SnapshotBackend::Zfs {
                dataset: mount.source.clone(),
            };
        }
    }

    if wants(BackendChoice::Lvm) && looks_like_lvm(mount.device()) {
        let probe = CommandSpec::new("lvs").args([
            "--noheadings",
            "-o",
            "vg_name,lv_name",
            mount.device(),
        ]);
        if let Some((vg, lv)) = run_quiet(runner, probe).and_then(|out| parse_lvs(&out.stdout)) {
            return SnapshotBackend::Lvm { vg, lv };
        }
    }

    if wants(BackendChoice::Btrfs) && mount.fstype == "btrfs" {
        let probe = CommandSpec::new("btrfs").args(["subvolume", "show", "/"]);
        if run_quiet(runner, probe).is_some() {
            return SnapshotBackend::Btrfs {
                mount: PathBuf::from("/"),
            };
        }
    }

    if choice != BackendChoice::Auto {
        tracing::warn!(
            pinned = %choice,
            fstype = %mount.fstype,
            "pinned snapshot backend unavailable; using file-level snapshots",
        );
    } else {
        tracing::debug!("no native snapshot support on root; using file-level snapshots");
    }
    SnapshotBackend::FileFallback
}

/// Run a snapshot tool and turn a non-zero exit into [`SnapshotError::Command`].
pub(crate) fn run_checked(
    runner: &dyn CommandRunner,
    spec: CommandSpec,
) -> Result<CommandOutput, SnapshotError> {
    let output = runner.run(&spec)?;
    if output.success() {
        Ok(output)
    } else {
        Err(SnapshotError::Command {
            command: spec.command_line(),
            message: output.summary(),
        })
    }
}

/// Probe helper: `None` on spawn failure or non-zero exit.
fn run_quiet(runner: &dyn CommandRunner, spec: CommandSpec) -> Option<CommandOutput> {
    match runner.run(&spec) {
        Ok(out) if out.success() => Some(out),
        Ok(out) => {
            tracing::debug!(command = %spec, reason = %out.summary(), "probe failed");
            None
        }
        Err(err) => {
            tracing::debug!(command = %spec, error = %err, "probe unavailable");
            None
        }
    }
}

fn looks_like_lvm(device: &str) -> bool {
    device.starts_with("/dev/mapper/")
        || (device.starts_with("/dev/") && device.trim_start_matches("/dev/").contains('/'))
}

fn parse_lvs(output: &str) -> Option<(String, String)> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    Some((fields.next()?.to_string(), fields.next()?.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::ScriptedRunner;

    fn runner_for(findmnt: &'static str) -> ScriptedRunner {
        ScriptedRunner::new(move |spec| match spec.program.as_str() {
            "findmnt" => CommandOutput::ok(findmnt),
            "lvs" => CommandOutput::ok("  vg0 root\n"),
            _ => CommandOutput::ok(""),
        })
    }

    #[test]
    fn parses_btrfs_subvolume_source() {
        let mount = parse_root_mount("btrfs  /dev/sda2[/@]\n").unwrap();
        assert_eq!(mount.fstype, "btrfs");
        assert_eq!(mount.device(), "/dev/sda2");
    }

    #[test]
    fn zfs_root_selects_zfs() {
        let runner = runner_for("zfs rpool/ROOT/debian\n");
        assert_eq!(
            detect_backend(&runner, BackendChoice::Auto),
            SnapshotBackend::Zfs {
                dataset: "rpool/ROOT/debian".into()
            }
        );
    }

    #[test]
    fn mapper_device_selects_lvm() {
        let runner = runner_for("ext4 /dev/mapper/vg0-root\n");
        assert_eq!(
            detect_backend(&runner, BackendChoice::Auto),
            SnapshotBackend::Lvm {
                vg: "vg0".into(),
                lv: "root".into()
            }
        );
    }

    #[test]
    fn overlay_root_falls_back_to_files() {
        let runner = runner_for("overlay overlay\n");
        assert_eq!(
            detect_backend(&runner, BackendChoice::Auto),
            SnapshotBackend::FileFallback
        );
    }

    #[test]
    fn pinned_backend_that_does_not_match_falls_back() {
        let runner = runner_for("btrfs /dev/sda2[/@]\n");
        assert_eq!(
            detect_backend(&runner, BackendChoice::Zfs),
            SnapshotBackend::FileFallback
        );
        assert_eq!(
            detect_backend(&runner, BackendChoice::Btrfs),
            SnapshotBackend::Btrfs {
                mount: PathBuf::from("/")
            }
        );
    }

    #[test]
    fn none_skips_probing() {
        let runner = ScriptedRunner::succeeding();
        assert_eq!(
            detect_backend(&runner, BackendChoice::None),
            SnapshotBackend::FileFallback
        );
        assert!(runner.calls().is_empty());
    }
}
