//! Persisted agent state behind an explicit store interface.
//!
//! [`FileStateStore`] keeps everything under a [`StateLayout`] root; JSON
//! documents use the `.tmp` + rename pattern so an interrupted run never
//! leaves a half-written table. [`MemoryStateStore`] backs tests.
//!
//! No locking happens here: the single-run lock held by the orchestrator is
//! the only guard these files need.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{state_io_err, StateError};
use crate::layout::StateLayout;
use crate::types::{
    ChecksumGeneration, ChecksumTable, ConflictMarker, ConflictRecord, SnapshotRecord,
};

/// Everything the sync engine persists between runs.
pub trait StateStore {
    /// `None` when the table was never saved.
    fn load_checksums(&self, generation: ChecksumGeneration)
        -> Result<Option<ChecksumTable>, StateError>;
    fn save_checksums(
        &mut self,
        generation: ChecksumGeneration,
        table: &ChecksumTable,
    ) -> Result<(), StateError>;
    fn clear_checksums(&mut self, generation: ChecksumGeneration) -> Result<(), StateError>;

    fn conflict_marker(&self) -> Result<Option<ConflictMarker>, StateError>;
    fn set_conflict_marker(&mut self, marker: &ConflictMarker) -> Result<(), StateError>;
    fn clear_conflict_marker(&mut self) -> Result<(), StateError>;
    fn append_conflicts(&mut self, records: &[ConflictRecord]) -> Result<(), StateError>;
    fn conflict_log(&self) -> Result<Vec<ConflictRecord>, StateError>;

    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StateError>;
    fn set_last_sync(&mut self, at: DateTime<Utc>) -> Result<(), StateError>;

    fn snapshot_pointer(&self) -> Result<Option<String>, StateError>;
    fn set_snapshot_pointer(&mut self, name: &str) -> Result<(), StateError>;

    fn snapshot_index(&self) -> Result<Vec<SnapshotRecord>, StateError>;
    fn save_snapshot_index(&mut self, records: &[SnapshotRecord]) -> Result<(), StateError>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// State store rooted at a [`StateLayout`].
#[derive(Debug, Clone)]
pub struct FileStateStore {
    layout: StateLayout,
}

impl FileStateStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    fn checksum_path(&self, generation: ChecksumGeneration) -> std::path::PathBuf {
        match generation {
            ChecksumGeneration::Baseline => self.layout.baseline_path(),
            ChecksumGeneration::Current => self.layout.current_path(),
        }
    }
}

impl StateStore for FileStateStore {
    fn load_checksums(
        &self,
        generation: ChecksumGeneration,
    ) -> Result<Option<ChecksumTable>, StateError> {
        read_json(&self.checksum_path(generation))
    }

    fn save_checksums(
        &mut self,
        generation: ChecksumGeneration,
        table: &ChecksumTable,
    ) -> Result<(), StateError> {
        write_json_atomic(&self.checksum_path(generation), table)
    }

    fn clear_checksums(&mut self, generation: ChecksumGeneration) -> Result<(), StateError> {
        remove_if_exists(&self.checksum_path(generation))
    }

    fn conflict_marker(&self) -> Result<Option<ConflictMarker>, StateError> {
        read_json(&self.layout.conflict_marker_path())
    }

    fn set_conflict_marker(&mut self, marker: &ConflictMarker) -> Result<(), StateError> {
        write_json_atomic(&self.layout.conflict_marker_path(), marker)
    }

    fn clear_conflict_marker(&mut self) -> Result<(), StateError> {
        remove_if_exists(&self.layout.conflict_marker_path())
    }

    fn append_conflicts(&mut self, records: &[ConflictRecord]) -> Result<(), StateError> {
        let path = self.layout.conflict_log_path();
        ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| state_io_err(&path, e))?;
        for record in records {
            let line = serde_json::to_string(record).map_err(|source| StateError::Json {
                path: path.clone(),
                source,
            })?;
            writeln!(file, "{line}").map_err(|e| state_io_err(&path, e))?;
        }
        Ok(())
    }

    fn conflict_log(&self) -> Result<Vec<ConflictRecord>, StateError> {
        let path = self.layout.conflict_log_path();
        let Some(contents) = read_optional(&path)? else {
            return Ok(Vec::new());
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StateError::Json {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }

    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StateError> {
        let path = self.layout.last_sync_path();
        let Some(contents) = read_optional(&path)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(contents.trim())
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|err| StateError::Corrupt {
                path,
                message: err.to_string(),
            })
    }

    fn set_last_sync(&mut self, at: DateTime<Utc>) -> Result<(), StateError> {
        write_text_atomic(&self.layout.last_sync_path(), &format!("{}\n", at.to_rfc3339()))
    }

    fn snapshot_pointer(&self) -> Result<Option<String>, StateError> {
        Ok(read_optional(&self.layout.snapshot_pointer_path())?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn set_snapshot_pointer(&mut self, name: &str) -> Result<(), StateError> {
        write_text_atomic(&self.layout.snapshot_pointer_path(), &format!("{name}\n"))
    }

    fn snapshot_index(&self) -> Result<Vec<SnapshotRecord>, StateError> {
        Ok(read_json(&self.layout.snapshot_index_path())?.unwrap_or_default())
    }

    fn save_snapshot_index(&mut self, records: &[SnapshotRecord]) -> Result<(), StateError> {
        write_json_atomic(&self.layout.snapshot_index_path(), &records)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StateError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(state_io_err(path, err)),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StateError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_text_atomic(path, &json)
}

/// Write to `<path>.tmp` then rename over `path`.
pub fn write_text_atomic(path: &Path, contents: &str) -> Result<(), StateError> {
    ensure_parent(path)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, contents).map_err(|e| state_io_err(&tmp, e))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(state_io_err(path, err));
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| state_io_err(parent, e))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(state_io_err(path, err)),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    pub baseline: Option<ChecksumTable>,
    pub current: Option<ChecksumTable>,
    pub marker: Option<ConflictMarker>,
    pub conflicts: Vec<ConflictRecord>,
    pub last_sync: Option<DateTime<Utc>>,
    pub pointer: Option<String>,
    pub snapshots: Vec<SnapshotRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, generation: ChecksumGeneration) -> &mut Option<ChecksumTable> {
        match generation {
            ChecksumGeneration::Baseline => &mut self.baseline,
            ChecksumGeneration::Current => &mut self.current,
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load_checksums(
        &self,
        generation: ChecksumGeneration,
    ) -> Result<Option<ChecksumTable>, StateError> {
        Ok(match generation {
            ChecksumGeneration::Baseline => self.baseline.clone(),
            ChecksumGeneration::Current => self.current.clone(),
        })
    }

    fn save_checksums(
        &mut self,
        generation: ChecksumGeneration,
        table: &ChecksumTable,
    ) -> Result<(), StateError> {
        *self.slot(generation) = Some(table.clone());
        Ok(())
    }

    fn clear_checksums(&mut self, generation: ChecksumGeneration) -> Result<(), StateError> {
        *self.slot(generation) = None;
        Ok(())
    }

    fn conflict_marker(&self) -> Result<Option<ConflictMarker>, StateError> {
        Ok(self.marker.clone())
    }

    fn set_conflict_marker(&mut self, marker: &ConflictMarker) -> Result<(), StateError> {
        self.marker = Some(marker.clone());
        Ok(())
    }

    fn clear_conflict_marker(&mut self) -> Result<(), StateError> {
        self.marker = None;
        Ok(())
    }

    fn append_conflicts(&mut self, records: &[ConflictRecord]) -> Result<(), StateError> {
        self.conflicts.extend_from_slice(records);
        Ok(())
    }

    fn conflict_log(&self) -> Result<Vec<ConflictRecord>, StateError> {
        Ok(self.conflicts.clone())
    }

    fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StateError> {
        Ok(self.last_sync)
    }

    fn set_last_sync(&mut self, at: DateTime<Utc>) -> Result<(), StateError> {
        self.last_sync = Some(at);
        Ok(())
    }

    fn snapshot_pointer(&self) -> Result<Option<String>, StateError> {
        Ok(self.pointer.clone())
    }

    fn set_snapshot_pointer(&mut self, name: &str) -> Result<(), StateError> {
        self.pointer = Some(name.to_string());
        Ok(())
    }

    fn snapshot_index(&self) -> Result<Vec<SnapshotRecord>, StateError> {
        Ok(self.snapshots.clone())
    }

    fn save_snapshot_index(&mut self, records: &[SnapshotRecord]) -> Result<(), StateError> {
        self.snapshots = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileChecksum;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStateStore) {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(StateLayout::new(tmp.path()));
        (tmp, store)
    }

    #[test]
    fn missing_tables_load_as_none() {
        let (_tmp, store) = store();
        assert!(store
            .load_checksums(ChecksumGeneration::Baseline)
            .unwrap()
            .is_none());
        assert!(store.conflict_marker().unwrap().is_none());
        assert!(store.last_sync().unwrap().is_none());
        assert!(store.snapshot_index().unwrap().is_empty());
        assert!(store.conflict_log().unwrap().is_empty());
    }

    #[test]
    fn baseline_save_leaves_no_tmp_file() {
        let (_tmp, mut store) = store();
        let mut table = ChecksumTable::new();
        table.insert("/etc/motd".into(), FileChecksum::Present("00ff".into()));
        store
            .save_checksums(ChecksumGeneration::Baseline, &table)
            .unwrap();

        let path = store.layout().baseline_path();
        assert!(path.exists());
        assert!(!path.with_file_name("baseline.json.tmp").exists());
        assert_eq!(
            store.load_checksums(ChecksumGeneration::Baseline).unwrap(),
            Some(table)
        );
    }

    #[test]
    fn conflict_log_appends_across_calls() {
        let (_tmp, mut store) = store();
        let record = ConflictRecord {
            path: "/etc/motd".into(),
            baseline: FileChecksum::Present("a".into()),
            current: FileChecksum::Present("b".into()),
            incoming: FileChecksum::Present("c".into()),
            detected_at: Utc::now(),
        };
        store.append_conflicts(&[record.clone()]).unwrap();
        store.append_conflicts(&[record.clone()]).unwrap();
        assert_eq!(store.conflict_log().unwrap(), vec![record.clone(), record]);
    }

    #[test]
    fn corrupt_marker_is_an_error() {
        let (_tmp, store) = store();
        let path = store.layout().conflict_marker_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            store.conflict_marker(),
            Err(StateError::Json { .. })
        ));
    }

    #[test]
    fn last_sync_roundtrips_as_rfc3339() {
        let (_tmp, mut store) = store();
        let at = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.set_last_sync(at).unwrap();
        let raw = fs::read_to_string(store.layout().last_sync_path()).unwrap();
        assert!(raw.starts_with("2026-03-01T10:00:00"));
        assert_eq!(store.last_sync().unwrap(), Some(at));
    }
}
