//! File deployment.
//!
//! ## Per-triplet protocol
//!
//! 1. Checksum source and target; identical means no-op under every policy.
//! 2. Apply the policy: `replace` writes, `default` writes only when the
//!    target is absent, `backup` copies a differing target to
//!    `<target>.backup-<YYYYmmddHHMMSS>` first.
//! 3. Write to `<target>.fleetsync.tmp`, then rename over the target.
//! 4. Hand the file to the owner of its directory.
//!
//! A failure is recorded against that file only; the rest still deploy.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleetsync_core::{FileChecksum, Policy};

use crate::checksum::{checksum_file, digest_bytes};
use crate::error::{io_err, SyncError};
use crate::triplet::{Discovered, ManagedFile};

pub const TMP_SUFFIX: &str = ".fleetsync.tmp";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one triplet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    /// Target did not exist and was written.
    Created,
    /// Differing target overwritten (`replace`).
    Replaced,
    /// Differing target moved aside, then written (`backup`).
    BackedUp { backup: PathBuf },
    /// Target already matches the source.
    Unchanged,
    /// Target exists and differs; `default` leaves it alone.
    KeptExisting,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub name: String,
    pub target: Option<PathBuf>,
    #[serde(flatten)]
    pub action: FileAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub results: Vec<FileResult>,
}

impl DeployReport {
    /// Files written this run (created, replaced or backed up).
    pub fn deployed(&self) -> usize {
        self.count(|a| {
            matches!(
                a,
                FileAction::Created | FileAction::Replaced | FileAction::BackedUp { .. }
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| matches!(a, FileAction::Unchanged | FileAction::KeptExisting))
    }

    pub fn backed_up(&self) -> usize {
        self.count(|a| matches!(a, FileAction::BackedUp { .. }))
    }

    pub fn errored(&self) -> usize {
        self.count(|a| matches!(a, FileAction::Failed { .. }))
    }

    /// Names of triplets that failed.
    pub fn failed_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.action, FileAction::Failed { .. }))
            .map(|r| r.name.as_str())
            .collect()
    }

    fn count(&self, pred: impl Fn(&FileAction) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.action)).count()
    }
}

// ---------------------------------------------------------------------------
// deploy
// ---------------------------------------------------------------------------

/// Deploy every discovered triplet. Invalid triplets are reported as failed.
pub fn deploy(discovered: &Discovered, now: DateTime<Utc>) -> DeployReport {
    let mut report = DeployReport::default();
    for invalid in &discovered.invalid {
        report.results.push(FileResult {
            name: invalid.name.clone(),
            target: None,
            action: FileAction::Failed {
                reason: invalid.reason.clone(),
            },
        });
    }
    for file in &discovered.files {
        let action = match deploy_one(file, now) {
            Ok(action) => action,
            Err(err) => {
                tracing::error!(file = %file.name, target = %file.target.display(), error = %err, "deploy failed");
                FileAction::Failed {
                    reason: err.to_string(),
                }
            }
        };
        report.results.push(FileResult {
            name: file.name.clone(),
            target: Some(file.target.clone()),
            action,
        });
    }
    tracing::info!(
        deployed = report.deployed(),
        skipped = report.skipped(),
        backed_up = report.backed_up(),
        errored = report.errored(),
        "file deployment finished",
    );
    report
}

pub fn deploy_one(file: &ManagedFile, now: DateTime<Utc>) -> Result<FileAction, SyncError> {
    let content = fs::read(&file.source).map_err(|e| io_err(&file.source, e))?;
    let target = &file.target;

    let existing = checksum_file(target);
    if existing == FileChecksum::Present(digest_bytes(&content)) {
        tracing::debug!(target = %target.display(), "unchanged");
        return Ok(FileAction::Unchanged);
    }

    let exists = existing != FileChecksum::Missing;
    let action = match (file.policy, exists) {
        (_, false) => FileAction::Created,
        (Policy::Default, true) => {
            tracing::info!(target = %target.display(), "target exists; policy 'default' keeps it");
            return Ok(FileAction::KeptExisting);
        }
        (Policy::Replace, true) => FileAction::Replaced,
        (Policy::Backup, true) => {
            // Copied, not moved: the target stays in place until the new
            // content is renamed over it.
            let backup = backup_path(target, now);
            fs::copy(target, &backup).map_err(|e| io_err(&backup, e))?;
            tracing::info!(target = %target.display(), backup = %backup.display(), "existing file backed up");
            FileAction::BackedUp { backup }
        }
    };

    let dir = target
        .parent()
        .ok_or_else(|| io_err(target, std::io::Error::other("target has no parent directory")))?;
    let written = fs::create_dir_all(dir)
        .map_err(|e| io_err(dir, e))
        .and_then(|()| atomic_write(target, &content));
    if let Err(err) = written {
        if let FileAction::BackedUp { backup } = &action {
            let _ = fs::remove_file(backup);
        }
        return Err(err);
    }
    match_parent_owner(target, dir);

    tracing::info!(target = %target.display(), policy = %file.policy, "deployed");
    Ok(action)
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Write `content` via `<path>.fleetsync.tmp` + rename. Keeps the mode of
/// an existing target.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    let tmp = PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()));
    let previous = fs::metadata(path).ok().map(|m| m.permissions());

    fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    if let Some(perms) = previous {
        let _ = fs::set_permissions(&tmp, perms);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn backup_path(target: &Path, now: DateTime<Utc>) -> PathBuf {
    let base = format!("{}.backup-{}", target.display(), now.format("%Y%m%d%H%M%S"));
    let mut candidate = PathBuf::from(&base);
    let mut n = 2;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}-{n}"));
        n += 1;
    }
    candidate
}

#[cfg(unix)]
fn match_parent_owner(target: &Path, dir: &Path) {
    use std::os::unix::fs::MetadataExt;
    let Ok(meta) = fs::metadata(dir) else {
        return;
    };
    if let Err(err) = std::os::unix::fs::chown(target, Some(meta.uid()), Some(meta.gid())) {
        tracing::warn!(target = %target.display(), error = %err, "could not set owner to directory owner");
    }
}

#[cfg(not(unix))]
fn match_parent_owner(_target: &Path, _dir: &Path) {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn managed(tmp: &TempDir, content: &str, policy: Policy) -> ManagedFile {
        let source = tmp.path().join("repo").join("app.conf");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, content).unwrap();
        ManagedFile {
            name: "app.conf".into(),
            source,
            target: tmp.path().join("etc").join("app.conf"),
            policy,
            policy_defaulted: false,
        }
    }

    #[test]
    fn missing_target_dir_is_created() {
        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "x=1\n", Policy::Default);
        assert_eq!(deploy_one(&file, Utc::now()).unwrap(), FileAction::Created);
        assert_eq!(fs::read_to_string(&file.target).unwrap(), "x=1\n");
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "data", Policy::Replace);
        deploy_one(&file, Utc::now()).unwrap();
        let tmp_path = PathBuf::from(format!("{}{TMP_SUFFIX}", file.target.display()));
        assert!(!tmp_path.exists(), ".fleetsync.tmp must be cleaned up");
    }

    #[test]
    fn backup_names_do_not_collide_within_a_second() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("f");
        let now = Utc::now();
        let first = backup_path(&target, now);
        fs::write(&first, "").unwrap();
        let second = backup_path(&target, now);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-2"));
    }

    #[test]
    fn backup_keeps_previous_content_beside_target() {
        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "new", Policy::Backup);
        fs::create_dir_all(file.target.parent().unwrap()).unwrap();
        fs::write(&file.target, "old").unwrap();

        let FileAction::BackedUp { backup } = deploy_one(&file, Utc::now()).unwrap() else {
            panic!("expected a backup");
        };
        assert_eq!(fs::read_to_string(&backup).unwrap(), "old");
        assert_eq!(fs::read_to_string(&file.target).unwrap(), "new");
    }

    #[test]
    fn failed_backup_write_leaves_target_in_place() {
        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "new", Policy::Backup);
        let dir = file.target.parent().unwrap().to_path_buf();
        fs::create_dir_all(&dir).unwrap();
        fs::write(&file.target, "old").unwrap();
        // A directory where the temporary file goes makes the write fail.
        fs::create_dir(PathBuf::from(format!("{}{TMP_SUFFIX}", file.target.display()))).unwrap();

        assert!(deploy_one(&file, Utc::now()).is_err());
        assert_eq!(fs::read_to_string(&file.target).unwrap(), "old");
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .collect();
        assert!(leftovers.is_empty(), "no stray backup after a failed write");
    }

    #[cfg(unix)]
    #[test]
    fn replace_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "new", Policy::Replace);
        fs::create_dir_all(file.target.parent().unwrap()).unwrap();
        fs::write(&file.target, "old").unwrap();
        fs::set_permissions(&file.target, fs::Permissions::from_mode(0o640)).unwrap();

        assert_eq!(deploy_one(&file, Utc::now()).unwrap(), FileAction::Replaced);
        let mode = fs::metadata(&file.target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let file = managed(&tmp, "new content", Policy::Replace);
        let dir = file.target.parent().unwrap().to_path_buf();
        fs::create_dir_all(&dir).unwrap();
        fs::write(&file.target, "original").unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();

        let result = deploy_one(&file, Utc::now());
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions; only assert when the write was refused.
        if result.is_err() {
            assert_eq!(fs::read_to_string(&file.target).unwrap(), "original");
            let tmp_path = PathBuf::from(format!("{}{TMP_SUFFIX}", file.target.display()));
            assert!(!tmp_path.exists());
        }
    }
}
