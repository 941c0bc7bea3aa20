//! Unified diffs for `fleetsync status --diff`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use similar::TextDiff;

use crate::conflict::{FileState, FileStatus};
use crate::error::io_err;
use crate::triplet::ManagedFile;
use crate::SyncError;

/// On-disk target (`a/`) against the repository copy (`b/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Diff every conflicting file that still has a repository source. Binary
/// content is reported as a one-line note.
pub fn conflict_diffs(
    statuses: &[FileStatus],
    files: &[ManagedFile],
) -> Result<Vec<FileDiff>, SyncError> {
    let mut diffs = Vec::new();
    for status in statuses.iter().filter(|s| s.state == FileState::Conflicting) {
        let Some(file) = files.iter().find(|f| f.key() == status.path) else {
            continue;
        };
        let local = read_existing_or_empty(&file.target)?;
        let repo = read_existing_or_empty(&file.source)?;
        if local == repo {
            continue;
        }
        diffs.push(FileDiff {
            path: file.target.clone(),
            unified_diff: unified(&file.target, &local, &repo),
        });
    }
    Ok(diffs)
}

fn unified(target: &Path, local: &[u8], repo: &[u8]) -> String {
    let (Ok(local), Ok(repo)) = (std::str::from_utf8(local), std::str::from_utf8(repo)) else {
        return format!("Binary files a{0} and b{0} differ\n", target.display());
    };
    let old_header = format!("a{}", target.display());
    let new_header = format!("b{}", target.display());
    TextDiff::from_lines(local, repo)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn read_existing_or_empty(path: &Path) -> Result<Vec<u8>, SyncError> {
    match std::fs::read(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(io_err(path, err)),
    }
}
