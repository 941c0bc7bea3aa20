//! Snapshot manager tests: one fresh state dir and scripted runner per test.

use std::fs;
use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use rstest::rstest;
use tempfile::TempDir;

use fleetsync_core::{
    BackendKind, CommandOutput, MemoryStateStore, ScriptedRunner, SnapshotSettings, StateLayout,
    StateStore,
};
use fleetsync_snapshot::{RollbackOutcome, SnapshotBackend, SnapshotError, SnapshotManager};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings(retention_days: u32) -> SnapshotSettings {
    SnapshotSettings {
        retention_days,
        ..SnapshotSettings::default()
    }
}

fn zfs() -> SnapshotBackend {
    SnapshotBackend::Zfs {
        dataset: "rpool/ROOT/debian".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn zfs_create_records_index_and_pointer() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let mut manager = SnapshotManager::new(&runner, settings(7), &layout).with_backend(zfs());

    let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
    let record = manager.create_at(&mut store, &[], now).unwrap();

    assert_eq!(record.name, "fleetsync-20260501-120000");
    assert_eq!(record.backend, BackendKind::Zfs);
    assert_eq!(record.locator, "rpool/ROOT/debian@fleetsync-20260501-120000");
    assert!(!record.good);
    assert_eq!(
        runner.command_lines(),
        vec!["zfs snapshot rpool/ROOT/debian@fleetsync-20260501-120000"]
    );
    assert_eq!(store.snapshot_pointer().unwrap().as_deref(), Some(record.name.as_str()));
    assert_eq!(store.snapshot_index().unwrap(), vec![record]);
}

#[test]
fn lvm_create_uses_configured_size() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let mut s = settings(7);
    s.lvm_size = "512M".to_string();
    let mut manager = SnapshotManager::new(&runner, s, &layout).with_backend(SnapshotBackend::Lvm {
        vg: "vg0".into(),
        lv: "root".into(),
    });

    let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
    let record = manager.create_at(&mut store, &[], now).unwrap();

    assert_eq!(record.locator, "vg0/fleetsync-20260501-120000");
    assert_eq!(
        runner.command_lines(),
        vec!["lvcreate -s -n fleetsync-20260501-120000 -L 512M vg0/root"]
    );
}

#[test]
fn failed_native_snapshot_falls_back_to_file_level() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path().join("state"));
    let runner = ScriptedRunner::new(|_| CommandOutput::failed(1, "cannot create snapshot: out of space"));
    let mut store = MemoryStateStore::new();
    let mut manager = SnapshotManager::new(&runner, settings(7), &layout).with_backend(zfs());

    let record = manager.create(&mut store, &[]).unwrap();
    assert_eq!(record.backend, BackendKind::File);
    assert!(PathBuf::from(&record.locator).join("manifest.json").is_file());
}

#[test]
fn file_snapshot_show_lists_manifest_including_state_files() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path().join("state"));
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let target = tmp.path().join("etc/motd");
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(&target, "hello").unwrap();

    let mut manager = SnapshotManager::new(&runner, settings(7), &layout)
        .with_backend(SnapshotBackend::FileFallback);
    let record = manager.create(&mut store, &[target.clone()]).unwrap();

    let details = manager.show(&store, &record.name).unwrap();
    assert!(details.pointer);
    let manifest = details.manifest.unwrap();
    let originals: Vec<_> = manifest.iter().map(|e| e.original.clone()).collect();
    assert!(originals.contains(&target));
    assert!(originals.contains(&layout.baseline_path()));
    let motd = manifest.iter().find(|e| e.original == target).unwrap();
    assert!(motd.existed);
    assert!(motd.stored.is_some());
    assert!(runner.calls().is_empty(), "file-level capture runs no commands");
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn rollback_outcome_depends_on_backend() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();

    let mut zfs_mgr = SnapshotManager::new(&runner, settings(7), &layout).with_backend(zfs());
    let z = zfs_mgr.create(&mut store, &[]).unwrap();

    let mut lvm_mgr = SnapshotManager::new(&runner, settings(7), &layout).with_backend(
        SnapshotBackend::Lvm {
            vg: "vg0".into(),
            lv: "root".into(),
        },
    );
    let later = Utc::now() + Duration::seconds(5);
    let l = lvm_mgr.create_at(&mut store, &[], later).unwrap();

    let mut btrfs_mgr = SnapshotManager::new(&runner, settings(7), &layout).with_backend(
        SnapshotBackend::Btrfs {
            mount: tmp.path().join("root"),
        },
    );
    let b = btrfs_mgr
        .create_at(&mut store, &[], later + Duration::seconds(5))
        .unwrap();

    runner.clear();
    assert_eq!(zfs_mgr.rollback(&store, &z.name).unwrap(), RollbackOutcome::Restored);
    assert!(matches!(
        lvm_mgr.rollback(&store, &l.name).unwrap(),
        RollbackOutcome::Scheduled { .. }
    ));
    match btrfs_mgr.rollback(&store, &b.name).unwrap() {
        RollbackOutcome::ManualRecovery { steps } => assert!(!steps.is_empty()),
        other => panic!("expected manual recovery, got {other:?}"),
    }

    let lines = runner.command_lines();
    assert_eq!(lines[0], format!("zfs rollback -r {}", z.locator));
    assert_eq!(lines[1], format!("lvconvert --merge {}", l.locator));
    assert_eq!(
        lines[2],
        format!("btrfs subvolume snapshot {} {}-restore", b.locator, b.locator)
    );
}

#[test]
fn file_rollback_restores_content() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path().join("state"));
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let target = tmp.path().join("app.conf");
    fs::write(&target, "v1").unwrap();

    let mut manager = SnapshotManager::new(&runner, settings(7), &layout)
        .with_backend(SnapshotBackend::FileFallback);
    let record = manager.create(&mut store, &[target.clone()]).unwrap();
    fs::write(&target, "v2").unwrap();

    let outcome = manager.rollback(&store, &record.tagged_name()).unwrap();
    assert_eq!(outcome, RollbackOutcome::Restored);
    assert_eq!(fs::read_to_string(&target).unwrap(), "v1");
}

#[test]
fn unknown_snapshot_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let store = MemoryStateStore::new();
    let manager = SnapshotManager::new(&runner, settings(7), &layout);
    assert!(matches!(
        manager.rollback(&store, "nope").unwrap_err(),
        SnapshotError::NotFound { .. }
    ));
}

// ---------------------------------------------------------------------------
// Tagging and retention
// ---------------------------------------------------------------------------

#[test]
fn tag_good_accepts_display_name_and_persists() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let mut manager = SnapshotManager::new(&runner, settings(7), &layout).with_backend(zfs());
    let record = manager.create(&mut store, &[]).unwrap();

    manager.tag_good(&mut store, &record.name).unwrap();
    manager.tag_good(&mut store, &format!("{}:good", record.name)).unwrap();

    let listed = manager.list(&store).unwrap();
    assert!(listed[0].good);
    assert_eq!(listed[0].tagged_name(), format!("{}:good", record.name));
}

#[rstest]
#[case::one_day(1, vec!["fleetsync-d2", "fleetsync-d10"])]
#[case::seven_days(7, vec!["fleetsync-d10"])]
#[case::unlimited(0, vec![])]
fn cleanup_removes_exactly_snapshots_older_than_retention(
    #[case] retention: u32,
    #[case] expected: Vec<&str>,
) {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::succeeding();
    let mut store = MemoryStateStore::new();
    let now = Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap();

    let make = |name: &str, age: Duration, good: bool| fleetsync_core::SnapshotRecord {
        name: name.to_string(),
        backend: BackendKind::Zfs,
        created_at: now - age,
        good,
        locator: format!("rpool/ROOT@{name}"),
    };
    // Exactly at the boundary is kept: age must be strictly greater.
    store
        .save_snapshot_index(&[
            make("fleetsync-d10", Duration::days(10), true),
            make("fleetsync-d7", Duration::days(7), false),
            make("fleetsync-d2", Duration::days(2), true),
            make("fleetsync-now", Duration::minutes(1), false),
        ])
        .unwrap();

    let manager = SnapshotManager::new(&runner, settings(retention), &layout);
    let mut removed = manager.cleanup_at(&mut store, now).unwrap();
    removed.sort();
    let mut expected: Vec<String> = expected.into_iter().map(String::from).collect();
    expected.sort();
    assert_eq!(removed, expected);

    let remaining: Vec<String> = store.snapshot_index().unwrap().into_iter().map(|r| r.name).collect();
    for name in &expected {
        assert!(!remaining.contains(name));
    }
    assert_eq!(remaining.len(), 4 - expected.len());
    for name in &expected {
        assert!(runner.command_lines().contains(&format!("zfs destroy rpool/ROOT@{name}")));
    }
}

#[test]
fn failed_delete_keeps_record_for_next_pass() {
    let tmp = TempDir::new().unwrap();
    let layout = StateLayout::new(tmp.path());
    let runner = ScriptedRunner::new(|_| CommandOutput::failed(1, "dataset is busy"));
    let mut store = MemoryStateStore::new();
    let now = Utc::now();
    store
        .save_snapshot_index(&[fleetsync_core::SnapshotRecord {
            name: "old".into(),
            backend: BackendKind::Zfs,
            created_at: now - Duration::days(30),
            good: true,
            locator: "rpool@old".into(),
        }])
        .unwrap();

    let manager = SnapshotManager::new(&runner, settings(7), &layout);
    assert!(manager.cleanup_at(&mut store, now).unwrap().is_empty());
    assert_eq!(store.snapshot_index().unwrap().len(), 1);
}
