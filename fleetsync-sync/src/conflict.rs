//! Three-way conflict detection.
//!
//! Per managed file, with P = baseline, C = on disk before the pull and
//! I = freshly pulled source:
//!
//! 1. no baseline entry: never conflicting, apply
//! 2. `I != P && C != P`: conflict
//! 3. `I != P`: repository change, apply
//! 4. `C != P`: local change, left to the file policy
//! 5. otherwise in sync
//!
//! Conflicts never auto-merge. They are appended to the conflict log and a
//! marker blocks every later run until `resolve` re-baselines.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleetsync_core::{
    ChecksumGeneration, ChecksumTable, ConflictMarker, ConflictRecord, FileChecksum, StateStore,
};

use crate::checksum::{checksum_file, checksum_paths};
use crate::triplet::ManagedFile;
use crate::SyncError;

/// How one file moved relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    InSync,
    RepoChanged,
    LocallyModified,
    Conflicting,
}

/// Per-file view for `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Clean,
    LocallyModified,
    Conflicting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub state: FileState,
    /// The repository copy differs from the baseline.
    pub update_pending: bool,
}

pub fn classify(
    baseline: Option<&FileChecksum>,
    current: &FileChecksum,
    incoming: &FileChecksum,
) -> Divergence {
    let Some(prev) = baseline else {
        return if current == incoming {
            Divergence::InSync
        } else {
            Divergence::RepoChanged
        };
    };
    match (incoming != prev, current != prev) {
        (true, true) => Divergence::Conflicting,
        (true, false) => Divergence::RepoChanged,
        (false, true) => Divergence::LocallyModified,
        (false, false) => Divergence::InSync,
    }
}

/// Targets to track: baseline keys plus every triplet target.
pub fn managed_targets(baseline: Option<&ChecksumTable>, files: &[ManagedFile]) -> BTreeSet<String> {
    baseline
        .into_iter()
        .flat_map(|table| table.keys().cloned())
        .chain(files.iter().map(ManagedFile::key))
        .collect()
}

/// Checksum `targets` on disk and persist them as the `current` table.
pub fn record_current(
    store: &mut dyn StateStore,
    targets: &BTreeSet<String>,
) -> Result<ChecksumTable, SyncError> {
    let table = checksum_paths(targets.iter().map(String::as_str));
    store.save_checksums(ChecksumGeneration::Current, &table)?;
    tracing::debug!(files = table.len(), "current checksums recorded");
    Ok(table)
}

/// Checksums of the repository sources, keyed by target.
pub fn incoming_checksums(files: &[ManagedFile]) -> ChecksumTable {
    files
        .iter()
        .map(|file| (file.key(), checksum_file(&file.source)))
        .collect()
}

/// Every conflicting path, in key order.
pub fn detect(
    baseline: Option<&ChecksumTable>,
    current: &ChecksumTable,
    incoming: &ChecksumTable,
    now: DateTime<Utc>,
) -> Vec<ConflictRecord> {
    let Some(baseline) = baseline else {
        tracing::info!("no baseline yet; first sync applies repository state");
        return Vec::new();
    };
    incoming
        .iter()
        .filter_map(|(path, inc)| {
            let prev = baseline.get(path)?;
            let cur = current.get(path).cloned().unwrap_or(FileChecksum::Missing);
            (classify(Some(prev), &cur, inc) == Divergence::Conflicting).then(|| ConflictRecord {
                path: path.clone(),
                baseline: prev.clone(),
                current: cur,
                incoming: inc.clone(),
                detected_at: now,
            })
        })
        .collect()
}

/// Append to the conflict log and set the blocking marker.
pub fn record_conflicts(
    store: &mut dyn StateStore,
    conflicts: &[ConflictRecord],
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    for conflict in conflicts {
        tracing::error!(
            path = %conflict.path,
            baseline = %conflict.baseline,
            current = %conflict.current,
            incoming = %conflict.incoming,
            "conflict: file changed locally and in the repository",
        );
    }
    store.append_conflicts(conflicts)?;
    store.set_conflict_marker(&ConflictMarker {
        created_at: now,
        paths: conflicts.iter().map(|c| c.path.clone()).collect(),
    })?;
    Ok(())
}

pub fn save_baseline(store: &mut dyn StateStore, table: &ChecksumTable) -> Result<(), SyncError> {
    store.save_checksums(ChecksumGeneration::Baseline, table)?;
    tracing::debug!(files = table.len(), "baseline saved");
    Ok(())
}

/// Re-baseline to what is on disk now and clear the marker. The conflict log
/// is kept. Returns the new baseline.
pub fn resolve(
    store: &mut dyn StateStore,
    targets: &BTreeSet<String>,
) -> Result<ChecksumTable, SyncError> {
    let table = checksum_paths(targets.iter().map(String::as_str));
    save_baseline(store, &table)?;
    store.clear_conflict_marker()?;
    store.clear_checksums(ChecksumGeneration::Current)?;
    tracing::info!(files = table.len(), "conflicts resolved; baseline reset to on-disk state");
    Ok(table)
}

/// Classify every managed file against the live filesystem.
pub fn status(
    store: &dyn StateStore,
    files: &[ManagedFile],
) -> Result<Vec<FileStatus>, SyncError> {
    let baseline = store.load_checksums(ChecksumGeneration::Baseline)?;
    let marked: BTreeSet<String> = store
        .conflict_marker()?
        .map(|m| m.paths.into_iter().collect())
        .unwrap_or_default();
    let incoming = incoming_checksums(files);

    let mut statuses: Vec<FileStatus> = managed_targets(baseline.as_ref(), files)
        .into_iter()
        .map(|path| {
            let prev = baseline.as_ref().and_then(|b| b.get(&path));
            let cur = checksum_file(Path::new(&path));
            let inc = incoming.get(&path).cloned().unwrap_or(FileChecksum::Missing);
            let divergence = classify(prev, &cur, &inc);
            let state = if marked.contains(&path) || divergence == Divergence::Conflicting {
                FileState::Conflicting
            } else if divergence == Divergence::LocallyModified {
                FileState::LocallyModified
            } else {
                FileState::Clean
            };
            FileStatus {
                update_pending: matches!(divergence, Divergence::RepoChanged | Divergence::Conflicting),
                path,
                state,
            }
        })
        .collect();
    statuses.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(statuses)
}

/// Human-readable age, e.g. `42s`, `5m`, `3h`, `2d`.
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    format_datetime_age_at(timestamp, Utc::now())
}

pub fn format_datetime_age_at(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn p(s: &str) -> FileChecksum {
        FileChecksum::Present(s.to_string())
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify(Some(&p("a")), &p("a"), &p("a")), Divergence::InSync);
        assert_eq!(classify(Some(&p("a")), &p("a"), &p("b")), Divergence::RepoChanged);
        assert_eq!(classify(Some(&p("a")), &p("c"), &p("a")), Divergence::LocallyModified);
        assert_eq!(classify(Some(&p("a")), &p("c"), &p("b")), Divergence::Conflicting);
        // Deleting a managed file counts as a local change.
        assert_eq!(
            classify(Some(&p("a")), &FileChecksum::Missing, &p("b")),
            Divergence::Conflicting
        );
        assert_eq!(classify(None, &p("c"), &p("b")), Divergence::RepoChanged);
    }

    #[test]
    fn no_baseline_never_conflicts() {
        let mut current = ChecksumTable::new();
        current.insert("/etc/motd".into(), p("local"));
        let mut incoming = ChecksumTable::new();
        incoming.insert("/etc/motd".into(), p("repo"));
        assert!(detect(None, &current, &incoming, Utc::now()).is_empty());
    }

    #[test]
    fn new_file_without_baseline_entry_never_conflicts() {
        let baseline = ChecksumTable::new();
        let mut current = ChecksumTable::new();
        current.insert("/etc/new".into(), p("local"));
        let mut incoming = ChecksumTable::new();
        incoming.insert("/etc/new".into(), p("repo"));
        assert!(detect(Some(&baseline), &current, &incoming, Utc::now()).is_empty());
    }

    #[test]
    fn ages_format_by_largest_unit() {
        let now = Utc::now();
        assert_eq!(format_datetime_age_at(now - Duration::seconds(5), now), "5s");
        assert_eq!(format_datetime_age_at(now - Duration::minutes(3), now), "3m");
        assert_eq!(format_datetime_age_at(now - Duration::hours(7), now), "7h");
        assert_eq!(format_datetime_age_at(now - Duration::days(9), now), "9d");
        assert_eq!(format_datetime_age_at(now + Duration::days(1), now), "0s");
    }
}
