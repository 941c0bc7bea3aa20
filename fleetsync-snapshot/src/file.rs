//! File-level fallback snapshots.
//!
//! Layout of one snapshot directory:
//!
//! ```text
//! <snapshots>/<name>/
//!   metadata.json
//!   manifest.json
//!   files/<absolute path without leading '/'>
//! ```
//!
//! Every captured path gets a manifest entry, including paths that did not
//! exist yet, so a restore can remove files the sync created.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{io_err, SnapshotError};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const FILES_DIR: &str = "files";

/// One captured path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub original: PathBuf,
    /// Copy relative to the snapshot directory; `None` when the path was
    /// absent or unreadable at capture time.
    pub stored: Option<PathBuf>,
    pub existed: bool,
    /// Unix permission bits of the original.
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entries: usize,
}

/// Copy `paths` into `<snapshots_dir>/<name>/`. Returns the snapshot
/// directory, which is the record's locator.
pub fn capture(
    snapshots_dir: &Path,
    name: &str,
    created_at: DateTime<Utc>,
    paths: &[PathBuf],
) -> Result<PathBuf, SnapshotError> {
    let dir = snapshots_dir.join(name);
    let files_dir = dir.join(FILES_DIR);
    fs::create_dir_all(&files_dir).map_err(|e| io_err(&files_dir, e))?;

    let mut manifest = Vec::with_capacity(paths.len());
    for original in paths {
        manifest.push(capture_one(&dir, original)?);
    }

    let metadata = SnapshotMetadata {
        name: name.to_string(),
        created_at,
        entries: manifest.len(),
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    write_json(&dir.join(METADATA_FILE), &metadata)?;
    Ok(dir)
}

fn capture_one(dir: &Path, original: &Path) -> Result<ManifestEntry, SnapshotError> {
    let meta = match fs::metadata(original) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(ManifestEntry {
                original: original.to_path_buf(),
                stored: None,
                existed: false,
                mode: None,
            });
        }
        Err(err) => {
            tracing::warn!(path = %original.display(), error = %err, "cannot stat file for snapshot");
            return Ok(unreadable(original, None));
        }
    };

    let stored = Path::new(FILES_DIR).join(relative_copy_path(original));
    let dest = dir.join(&stored);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mode = file_mode(&meta);
    match fs::copy(original, &dest) {
        Ok(_) => Ok(ManifestEntry {
            original: original.to_path_buf(),
            stored: Some(stored),
            existed: true,
            mode,
        }),
        Err(err) => {
            tracing::warn!(path = %original.display(), error = %err, "cannot copy file into snapshot");
            Ok(unreadable(original, mode))
        }
    }
}

fn unreadable(original: &Path, mode: Option<u32>) -> ManifestEntry {
    ManifestEntry {
        original: original.to_path_buf(),
        stored: None,
        existed: true,
        mode,
    }
}

/// Replay the manifest: restore copies, remove files that were absent at
/// capture time. Entries that could not be captured are left alone.
pub fn restore(dir: &Path) -> Result<usize, SnapshotError> {
    let manifest = read_manifest(dir)?;
    let mut restored = 0;
    for entry in &manifest {
        match (&entry.stored, entry.existed) {
            (Some(stored), _) => {
                restore_copy(&dir.join(stored), &entry.original, entry.mode)?;
                restored += 1;
            }
            (None, false) => match fs::remove_file(&entry.original) {
                Ok(()) => {
                    tracing::info!(path = %entry.original.display(), "removed file created after snapshot");
                    restored += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&entry.original, err)),
            },
            (None, true) => {
                tracing::warn!(path = %entry.original.display(), "no stored copy; leaving file untouched");
            }
        }
    }
    Ok(restored)
}

fn restore_copy(stored: &Path, original: &Path, mode: Option<u32>) -> Result<(), SnapshotError> {
    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = tmp_sibling(original);
    fs::copy(stored, &tmp).map_err(|e| io_err(&tmp, e))?;
    set_mode(&tmp, mode)?;
    fs::rename(&tmp, original).map_err(|e| io_err(original, e))?;
    tracing::info!(path = %original.display(), "restored from snapshot");
    Ok(())
}

pub fn read_manifest(dir: &Path) -> Result<Vec<ManifestEntry>, SnapshotError> {
    read_json(&dir.join(MANIFEST_FILE))
}

pub fn read_metadata(dir: &Path) -> Result<SnapshotMetadata, SnapshotError> {
    read_json(&dir.join(METADATA_FILE))
}

/// Remove the snapshot directory. Already gone is fine.
pub fn remove(dir: &Path) -> Result<(), SnapshotError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(dir, err)),
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// `/etc/motd` -> `etc/motd`; `..` and root components are dropped.
fn relative_copy_path(original: &Path) -> PathBuf {
    original
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".fleetsync.tmp");
    path.with_file_name(name)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<(), SnapshotError> {
    Ok(())
}
