//! File-backed state store: layout, atomic-write safety, and parity with the
//! in-memory store.

use assert_fs::prelude::*;
use chrono::Utc;
use fleetsync_core::{
    BackendKind, ChecksumGeneration, ChecksumTable, ConflictMarker, FileChecksum, FileStateStore,
    MemoryStateStore, SnapshotRecord, StateLayout, StateStore,
};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

fn table() -> ChecksumTable {
    let mut table = ChecksumTable::new();
    table.insert("/etc/motd".into(), FileChecksum::Present("aa".into()));
    table.insert("/home/dev/.bashrc".into(), FileChecksum::Missing);
    table
}

fn record(name: &str) -> SnapshotRecord {
    SnapshotRecord {
        name: name.into(),
        backend: BackendKind::File,
        created_at: Utc::now(),
        good: false,
        locator: format!("/var/lib/fleetsync/snapshots/{name}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Layout
// ---------------------------------------------------------------------------

#[test]
fn state_files_land_at_documented_paths() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let mut store = FileStateStore::new(StateLayout::new(root.path()));

    store
        .save_checksums(ChecksumGeneration::Baseline, &table())
        .expect("baseline");
    store
        .save_checksums(ChecksumGeneration::Current, &table())
        .expect("current");
    store
        .set_conflict_marker(&ConflictMarker {
            created_at: Utc::now(),
            paths: vec!["/etc/motd".into()],
        })
        .expect("marker");
    store.set_last_sync(Utc::now()).expect("last sync");
    store.set_snapshot_pointer("fleetsync-20260101-000000").expect("pointer");
    store
        .save_snapshot_index(&[record("fleetsync-20260101-000000")])
        .expect("index");

    root.child("checksums/baseline.json").assert(predicate::path::exists());
    root.child("checksums/current.json").assert(predicate::path::exists());
    root.child("conflict.marker").assert(predicate::path::exists());
    root.child("last_sync").assert(predicate::path::exists());
    root.child("snapshot.pointer")
        .assert(predicate::str::contains("fleetsync-20260101-000000"));
    root.child("snapshots/index.json").assert(predicate::path::exists());
}

#[test]
fn clearing_removes_files_and_is_idempotent() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let mut store = FileStateStore::new(StateLayout::new(root.path()));
    store
        .save_checksums(ChecksumGeneration::Current, &table())
        .expect("save");

    store.clear_checksums(ChecksumGeneration::Current).expect("clear");
    store.clear_checksums(ChecksumGeneration::Current).expect("clear twice");
    store.clear_conflict_marker().expect("clear absent marker");

    root.child("checksums/current.json")
        .assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn interrupted_write_leaves_previous_baseline_intact() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let mut store = FileStateStore::new(StateLayout::new(root.path()));
    store
        .save_checksums(ChecksumGeneration::Baseline, &table())
        .expect("save");

    // Simulate a crash after the temp write but before the rename.
    let tmp = root.path().join("checksums/baseline.json.tmp");
    fs::write(&tmp, b"{ truncated").expect("write crash tmp");

    let loaded = store
        .load_checksums(ChecksumGeneration::Baseline)
        .expect("load");
    assert_eq!(loaded, Some(table()));
}

// ---------------------------------------------------------------------------
// 3. Parity between implementations
// ---------------------------------------------------------------------------

#[rstest]
#[case::file(true)]
#[case::memory(false)]
fn stores_behave_identically(#[case] file_backed: bool) {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let mut store: Box<dyn StateStore> = if file_backed {
        Box::new(FileStateStore::new(StateLayout::new(root.path())))
    } else {
        Box::new(MemoryStateStore::new())
    };

    assert!(store
        .load_checksums(ChecksumGeneration::Baseline)
        .expect("load")
        .is_none());
    store
        .save_checksums(ChecksumGeneration::Baseline, &table())
        .expect("save");
    assert_eq!(
        store
            .load_checksums(ChecksumGeneration::Baseline)
            .expect("load"),
        Some(table())
    );
    assert!(store
        .load_checksums(ChecksumGeneration::Current)
        .expect("load current")
        .is_none());

    assert!(store.snapshot_pointer().expect("pointer").is_none());
    store.set_snapshot_pointer("snap-a").expect("set pointer");
    assert_eq!(store.snapshot_pointer().expect("pointer").as_deref(), Some("snap-a"));

    let records = vec![record("a"), record("b")];
    store.save_snapshot_index(&records).expect("index");
    assert_eq!(store.snapshot_index().expect("index"), records);
}
