//! Snapshot lifecycle: create, list, show, rollback, tag, prune.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use fleetsync_core::{
    BackendKind, CommandRunner, SnapshotRecord, SnapshotSettings, StateLayout, StateStore,
};

use crate::backend::{detect_backend, SnapshotBackend};
use crate::error::SnapshotError;
use crate::file::{self, ManifestEntry, SnapshotMetadata};
use crate::{btrfs, lvm, zfs};

/// What a rollback actually achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The captured state is back in place.
    Restored,
    /// The restore completes later (LVM merge on next activation).
    Scheduled { detail: String },
    /// A restore copy was prepared; the operator must finish by hand.
    ManualRecovery { steps: Vec<String> },
}

/// Index record plus backend-specific detail for `show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDetails {
    pub record: SnapshotRecord,
    pub pointer: bool,
    /// Present for file-level snapshots only.
    pub metadata: Option<SnapshotMetadata>,
    pub manifest: Option<Vec<ManifestEntry>>,
}

/// Owns backend choice and the snapshot index.
pub struct SnapshotManager<'r> {
    runner: &'r dyn CommandRunner,
    settings: SnapshotSettings,
    snapshots_dir: PathBuf,
    internal_files: Vec<PathBuf>,
    backend: Option<SnapshotBackend>,
}

impl<'r> SnapshotManager<'r> {
    pub fn new(runner: &'r dyn CommandRunner, settings: SnapshotSettings, layout: &StateLayout) -> Self {
        Self {
            runner,
            settings,
            snapshots_dir: layout.snapshots_dir(),
            internal_files: layout.internal_state_files(),
            backend: None,
        }
    }

    /// Skip detection and use `backend` for new snapshots.
    pub fn with_backend(mut self, backend: SnapshotBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Backend for new snapshots, detected once per manager.
    pub fn detect_backend(&mut self) -> SnapshotBackend {
        if let Some(backend) = &self.backend {
            return backend.clone();
        }
        let backend = detect_backend(self.runner, self.settings.backend);
        tracing::info!(backend = %backend.kind(), "snapshot backend selected");
        self.backend = Some(backend.clone());
        backend
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Capture the current state. `managed` lists the target paths the
    /// file-level fallback copies (internal state files are always added).
    pub fn create(
        &mut self,
        store: &mut dyn StateStore,
        managed: &[PathBuf],
    ) -> Result<SnapshotRecord, SnapshotError> {
        self.create_at(store, managed, Utc::now())
    }

    pub fn create_at(
        &mut self,
        store: &mut dyn StateStore,
        managed: &[PathBuf],
        now: DateTime<Utc>,
    ) -> Result<SnapshotRecord, SnapshotError> {
        let mut index = store.snapshot_index()?;
        let name = unique_name(&self.settings.prefix, now, &index);
        let backend = self.detect_backend();

        let (kind, locator) = match self.capture(&backend, &name, managed, now) {
            Ok(locator) => (backend.kind(), locator),
            Err(err) if backend != SnapshotBackend::FileFallback => {
                tracing::warn!(
                    backend = %backend.kind(),
                    error = %err,
                    "native snapshot failed; falling back to file-level snapshot",
                );
                let locator = self.capture(&SnapshotBackend::FileFallback, &name, managed, now)?;
                (BackendKind::File, locator)
            }
            Err(err) => return Err(err),
        };

        let record = SnapshotRecord {
            name,
            backend: kind,
            created_at: now,
            good: false,
            locator,
        };
        index.push(record.clone());
        store.save_snapshot_index(&index)?;
        store.set_snapshot_pointer(&record.name)?;
        tracing::info!(snapshot = %record.name, backend = %record.backend, "snapshot created");
        Ok(record)
    }

    fn capture(
        &self,
        backend: &SnapshotBackend,
        name: &str,
        managed: &[PathBuf],
        now: DateTime<Utc>,
    ) -> Result<String, SnapshotError> {
        match backend {
            SnapshotBackend::Zfs { dataset } => zfs::create(self.runner, dataset, name),
            SnapshotBackend::Lvm { vg, lv } => {
                lvm::create(self.runner, vg, lv, name, &self.settings.lvm_size)
            }
            SnapshotBackend::Btrfs { mount } => btrfs::create(self.runner, mount, name),
            SnapshotBackend::FileFallback => {
                let paths: BTreeSet<PathBuf> = managed
                    .iter()
                    .chain(self.internal_files.iter())
                    .cloned()
                    .collect();
                let paths: Vec<PathBuf> = paths.into_iter().collect();
                let dir = file::capture(&self.snapshots_dir, name, now, &paths)?;
                Ok(dir.to_string_lossy().into_owned())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// All snapshots, oldest first.
    pub fn list(&self, store: &dyn StateStore) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        let mut index = store.snapshot_index()?;
        index.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(index)
    }

    /// Accepts the bare name or the `:good`-tagged display name.
    pub fn show(&self, store: &dyn StateStore, name: &str) -> Result<SnapshotDetails, SnapshotError> {
        let record = find(store, name)?;
        let pointer = store.snapshot_pointer()?.as_deref() == Some(record.name.as_str());
        let (metadata, manifest) = if record.backend == BackendKind::File {
            let dir = Path::new(&record.locator);
            (Some(file::read_metadata(dir)?), Some(file::read_manifest(dir)?))
        } else {
            (None, None)
        };
        Ok(SnapshotDetails {
            record,
            pointer,
            metadata,
            manifest,
        })
    }

    // -----------------------------------------------------------------------
    // Mutate
    // -----------------------------------------------------------------------

    pub fn rollback(&self, store: &dyn StateStore, name: &str) -> Result<RollbackOutcome, SnapshotError> {
        let record = find(store, name)?;
        tracing::info!(snapshot = %record.name, backend = %record.backend, "rolling back");
        let outcome = match record.backend {
            BackendKind::Zfs => {
                zfs::rollback(self.runner, &record.locator)?;
                RollbackOutcome::Restored
            }
            BackendKind::Lvm => RollbackOutcome::Scheduled {
                detail: lvm::rollback(self.runner, &record.locator)?,
            },
            BackendKind::Btrfs => RollbackOutcome::ManualRecovery {
                steps: btrfs::prepare_restore(self.runner, &record.locator)?,
            },
            BackendKind::File => {
                let count = file::restore(Path::new(&record.locator))?;
                tracing::info!(snapshot = %record.name, files = count, "file-level snapshot replayed");
                RollbackOutcome::Restored
            }
        };
        Ok(outcome)
    }

    /// Mark a snapshot as taken before a fully successful run.
    pub fn tag_good(&self, store: &mut dyn StateStore, name: &str) -> Result<(), SnapshotError> {
        let mut index = store.snapshot_index()?;
        let wanted = strip_tag(name);
        let record = index
            .iter_mut()
            .find(|r| r.name == wanted)
            .ok_or_else(|| SnapshotError::NotFound {
                name: wanted.to_string(),
            })?;
        if !record.good {
            record.good = true;
            store.save_snapshot_index(&index)?;
            tracing::info!(snapshot = %wanted, "snapshot tagged good");
        }
        Ok(())
    }

    /// Delete snapshots older than the retention window.
    pub fn cleanup(&self, store: &mut dyn StateStore) -> Result<Vec<String>, SnapshotError> {
        self.cleanup_at(store, Utc::now())
    }

    /// Removes every snapshot, tagged or not, whose age is strictly greater
    /// than `retention_days`. A failed delete keeps the record for the next
    /// pass.
    pub fn cleanup_at(
        &self,
        store: &mut dyn StateStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, SnapshotError> {
        if self.settings.retention_days == 0 {
            return Ok(Vec::new());
        }
        let max_age = Duration::days(i64::from(self.settings.retention_days));
        let index = store.snapshot_index()?;
        let mut kept = Vec::with_capacity(index.len());
        let mut removed = Vec::new();

        for record in index {
            if now - record.created_at <= max_age {
                kept.push(record);
                continue;
            }
            match self.delete(&record) {
                Ok(()) => {
                    tracing::info!(snapshot = %record.name, "expired snapshot removed");
                    removed.push(record.name);
                }
                Err(err) => {
                    tracing::warn!(snapshot = %record.name, error = %err, "failed to remove expired snapshot");
                    kept.push(record);
                }
            }
        }

        if !removed.is_empty() {
            store.save_snapshot_index(&kept)?;
        }
        Ok(removed)
    }

    fn delete(&self, record: &SnapshotRecord) -> Result<(), SnapshotError> {
        match record.backend {
            BackendKind::Zfs => zfs::destroy(self.runner, &record.locator),
            BackendKind::Lvm => lvm::destroy(self.runner, &record.locator),
            BackendKind::Btrfs => btrfs::destroy(self.runner, &record.locator),
            BackendKind::File => file::remove(Path::new(&record.locator)),
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn strip_tag(name: &str) -> &str {
    name.strip_suffix(":good").unwrap_or(name)
}

fn find(store: &dyn StateStore, name: &str) -> Result<SnapshotRecord, SnapshotError> {
    let wanted = strip_tag(name);
    store
        .snapshot_index()?
        .into_iter()
        .find(|r| r.name == wanted)
        .ok_or_else(|| SnapshotError::NotFound {
            name: wanted.to_string(),
        })
}

/// `<prefix>-<YYYYmmdd-HHMMSS>`, suffixed `-2`, `-3`, … on collision.
pub(crate) fn unique_name(prefix: &str, now: DateTime<Utc>, index: &[SnapshotRecord]) -> String {
    let base = format!("{prefix}-{}", now.format("%Y%m%d-%H%M%S"));
    let taken = |candidate: &str| index.iter().any(|r| r.name == candidate);
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(name: &str) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            backend: BackendKind::File,
            created_at: Utc::now(),
            good: false,
            locator: String::new(),
        }
    }

    #[test]
    fn names_are_timestamped_and_deduplicated() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(unique_name("fleetsync", now, &[]), "fleetsync-20260304-050607");

        let index = vec![record("fleetsync-20260304-050607"), record("fleetsync-20260304-050607-2")];
        assert_eq!(unique_name("fleetsync", now, &index), "fleetsync-20260304-050607-3");
    }

    #[test]
    fn good_tag_is_stripped_for_lookup() {
        assert_eq!(strip_tag("snap:good"), "snap");
        assert_eq!(strip_tag("snap"), "snap");
    }
}
