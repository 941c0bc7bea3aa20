//! The `fleetsync` binary: argument handling, exit codes and the operator
//! commands against a temporary state directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use fleetsync_core::{
    ChecksumGeneration, ChecksumTable, ConflictMarker, FileStateStore, ScriptedRunner,
    SnapshotSettings, StateLayout, StateStore, SyncLock,
};
use fleetsync_snapshot::{SnapshotBackend, SnapshotManager};
use fleetsync_sync::checksum::checksum_file;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Env {
    tmp: TempDir,
}

impl Env {
    fn new() -> Self {
        let env = Self {
            tmp: TempDir::new().expect("tempdir"),
        };
        env.write_config("https://git.example.com/fleet/config.git");
        env
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn config(&self) -> PathBuf {
        self.root().join("fleetsync.conf")
    }

    fn layout(&self) -> StateLayout {
        StateLayout::new(self.root().join("state"))
    }

    fn store(&self) -> FileStateStore {
        FileStateStore::new(self.layout())
    }

    fn target(&self) -> PathBuf {
        self.root().join("etc/motd")
    }

    fn write_config(&self, url: &str) {
        fs::write(
            self.config(),
            format!(
                "CONFIG_REPO_URL={url}\nSNAPSHOT_ENABLED=no\nLOG_FILE={}\n",
                self.root().join("log/fleetsync.log").display()
            ),
        )
        .expect("config");
    }

    /// Cached checkout with one `replace` triplet for `etc/motd`.
    fn checkout(&self, repo_content: &str) {
        let repo = self.layout().repo_dir();
        fs::create_dir_all(repo.join(".git")).expect("git dir");
        let files = repo.join("files");
        fs::create_dir_all(&files).expect("files dir");
        fs::write(files.join("motd"), repo_content).expect("source");
        fs::write(
            files.join("motd.path"),
            format!("{}\n", self.root().join("etc").display()),
        )
        .expect("path side-car");
        fs::write(files.join("motd.policy"), "replace\n").expect("policy side-car");
    }

    /// Deployed `content` at baseline, then edited on disk to `local`.
    fn diverge(&self, content: &str, local: &str) {
        fs::create_dir_all(self.root().join("etc")).expect("etc");
        fs::write(self.target(), content).expect("deployed");
        let mut baseline = ChecksumTable::new();
        baseline.insert(
            self.target().to_string_lossy().into_owned(),
            checksum_file(&self.target()),
        );
        self.store()
            .save_checksums(ChecksumGeneration::Baseline, &baseline)
            .expect("baseline");
        fs::write(self.target(), local).expect("local edit");
    }

    fn mark_conflict(&self) {
        self.store()
            .set_conflict_marker(&ConflictMarker {
                created_at: Utc::now(),
                paths: vec![self.target().to_string_lossy().into_owned()],
            })
            .expect("marker");
    }

    /// File-level snapshot of the target as it is now.
    fn snapshot(&self) -> String {
        let runner = ScriptedRunner::succeeding();
        let mut manager = SnapshotManager::new(&runner, SnapshotSettings::default(), &self.layout())
            .with_backend(SnapshotBackend::FileFallback);
        let mut store = self.store();
        manager
            .create(&mut store, &[self.target()])
            .expect("snapshot")
            .name
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fleetsync"));
        cmd.arg("--config")
            .arg(self.config())
            .arg("--state-dir")
            .arg(self.layout().root())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env_remove("RUST_LOG");
        cmd
    }
}

// ---------------------------------------------------------------------------
// 1. Sync exit codes
// ---------------------------------------------------------------------------

#[test]
fn help_lists_every_subcommand() {
    let env = Env::new();
    let output = env.cmd().arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for sub in ["sync", "list", "status", "show", "restore", "resolve"] {
        assert!(help.contains(sub), "missing {sub} in:\n{help}");
    }
}

#[test]
fn missing_config_exits_3() {
    let env = Env::new();
    fs::remove_file(env.config()).unwrap();
    env.cmd().arg("sync").assert().code(3);
}

#[test]
fn malformed_config_exits_3() {
    let env = Env::new();
    env.write_config("not a url");
    env.cmd().arg("sync").assert().code(3);
}

#[test]
fn held_lock_exits_2_without_touching_state() {
    let env = Env::new();
    let lock = env.layout().lock_path();
    let _held = SyncLock::acquire(&lock).unwrap();

    env.cmd()
        .arg("sync")
        .assert()
        .code(2)
        .stdout(contains(format!("pid {}", std::process::id())));
    assert!(!env.layout().repo_dir().exists());
}

#[test]
fn leftover_lock_record_from_killed_run_is_ignored() {
    let env = Env::new();
    env.write_config("https://127.0.0.1:9/fleet/config.git");
    let lock = env.layout().lock_path();
    fs::create_dir_all(lock.parent().unwrap()).unwrap();
    // Nobody holds the lock; the record names a PID that is alive right now.
    fs::write(
        &lock,
        format!(r#"{{"pid":{},"started_at":"{}"}}"#, std::process::id(), Utc::now().to_rfc3339()),
    )
    .unwrap();

    // Gets past the lock and fails later, at the clone.
    env.cmd().arg("sync").assert().code(4);
}

#[test]
fn unreachable_repository_without_cache_exits_4() {
    let env = Env::new();
    env.write_config("https://127.0.0.1:9/fleet/config.git");
    env.cmd().arg("sync").assert().code(4);
    assert!(SyncLock::acquire(&env.layout().lock_path()).is_ok(), "lock released on failure");
}

#[test]
fn conflict_marker_blocks_sync_with_5() {
    let env = Env::new();
    env.mark_conflict();
    env.cmd()
        .arg("sync")
        .assert()
        .code(5)
        .stdout(contains("blocked by conflicts"));
}

// ---------------------------------------------------------------------------
// 2. Snapshots
// ---------------------------------------------------------------------------

#[test]
fn list_on_fresh_host_is_empty() {
    let env = Env::new();
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("No snapshots."));
}

#[test]
fn list_json_reports_backend_and_latest() {
    let env = Env::new();
    fs::create_dir_all(env.root().join("etc")).unwrap();
    fs::write(env.target(), "v1\n").unwrap();
    let name = env.snapshot();

    let output = env.cmd().args(["list", "--json"]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["name"], name.as_str());
    assert_eq!(json[0]["backend"], "file");
    assert_eq!(json[0]["latest"], true);
    assert_eq!(json[0]["good"], false);
}

#[test]
fn show_prints_file_manifest() {
    let env = Env::new();
    fs::create_dir_all(env.root().join("etc")).unwrap();
    fs::write(env.target(), "v1\n").unwrap();
    let name = env.snapshot();

    env.cmd()
        .args(["show", &name])
        .assert()
        .success()
        .stdout(contains("file").and(contains(env.target().to_string_lossy().into_owned())));
}

#[test]
fn show_unknown_snapshot_fails() {
    let env = Env::new();
    env.cmd()
        .args(["show", "fleetsync-19700101-000000"])
        .assert()
        .code(1)
        .stderr(contains("fleetsync-19700101-000000"));
}

#[test]
fn restore_replays_files_and_clears_conflicts() {
    let env = Env::new();
    fs::create_dir_all(env.root().join("etc")).unwrap();
    fs::write(env.target(), "before\n").unwrap();
    let name = env.snapshot();
    fs::write(env.target(), "after\n").unwrap();
    env.mark_conflict();

    env.cmd().args(["restore", &name, "--yes"]).assert().success();
    assert_eq!(fs::read_to_string(env.target()).unwrap(), "before\n");
    assert!(env.store().conflict_marker().unwrap().is_none());
}

#[test]
fn restore_declined_changes_nothing() {
    let env = Env::new();
    fs::create_dir_all(env.root().join("etc")).unwrap();
    fs::write(env.target(), "before\n").unwrap();
    let name = env.snapshot();
    fs::write(env.target(), "after\n").unwrap();

    assert_cmd::Command::from_std(env.cmd())
        .args(["restore", &name])
        .write_stdin("n\n")
        .assert()
        .code(1)
        .stdout(contains("Aborted."));
    assert_eq!(fs::read_to_string(env.target()).unwrap(), "after\n");
}

// ---------------------------------------------------------------------------
// 3. Status and resolve
// ---------------------------------------------------------------------------

#[test]
fn status_reports_conflicting_file_with_diff() {
    let env = Env::new();
    env.checkout("from git\n");
    env.diverge("original\n", "local tweak\n");
    env.mark_conflict();

    env.cmd()
        .args(["status", "--diff"])
        .assert()
        .code(5)
        .stdout(
            contains("CONFLICTING")
                .and(contains("-local tweak"))
                .and(contains("+from git")),
        );
}

#[test]
fn status_json_on_clean_host() {
    let env = Env::new();
    env.checkout("same\n");
    env.diverge("same\n", "same\n");

    let output = env.cmd().args(["status", "--json"]).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["conflict_marker"].is_null());
    assert_eq!(json["files"][0]["state"], "clean");
    assert!(json.get("diffs").is_none());
}

#[test]
fn resolve_rebaselines_to_disk_and_unblocks() {
    let env = Env::new();
    env.checkout("from git\n");
    env.diverge("original\n", "local tweak\n");
    env.mark_conflict();

    env.cmd()
        .args(["resolve", "--yes"])
        .assert()
        .success()
        .stdout(contains("baseline reset"));

    let store = env.store();
    assert!(store.conflict_marker().unwrap().is_none());
    let baseline = store
        .load_checksums(ChecksumGeneration::Baseline)
        .unwrap()
        .unwrap();
    assert_eq!(
        baseline.get(&env.target().to_string_lossy().into_owned()),
        Some(&checksum_file(&env.target()))
    );
    assert_eq!(fs::read_to_string(env.target()).unwrap(), "local tweak\n");
}
