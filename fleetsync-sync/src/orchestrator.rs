//! One oneshot sync run.
//!
//! lock → config → (marker check) → snapshot → current checksums → git →
//! conflict check → scripts → files → packages → baseline, tag, prune.
//!
//! Only conflicts and script failures abort a run after the repository is
//! updated; file and package failures are reported and the run continues.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use fleetsync_core::{
    ChecksumGeneration, ChecksumTable, CommandRunner, Config, ConflictMarker, ConflictRecord,
    SnapshotMode, SnapshotRecord, StateLayout, StateStore, SyncLock,
};
use fleetsync_detector::{detect_host, HostInfo, HostProbe};
use fleetsync_snapshot::SnapshotManager;

use crate::conflict;
use crate::deploy::{self, DeployReport, FileAction};
use crate::error::{exit_code, SyncError};
use crate::git::{self, RepoSync};
use crate::packages::{self, ManagerReport};
use crate::scripts::{self, ScriptEnv, ScriptReport};
use crate::triplet::{self, Discovered};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Conflict,
    Error,
}

/// Everything one run did. Transient; logged and mapped to an exit code.
#[derive(Debug)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub error: Option<SyncError>,
    /// Set when an earlier, unresolved conflict blocked the run.
    pub blocked_by: Option<ConflictMarker>,
    pub snapshot: Option<SnapshotRecord>,
    pub repo: Option<RepoSync>,
    pub conflicts: Vec<ConflictRecord>,
    pub scripts: Option<ScriptReport>,
    pub files: Option<DeployReport>,
    pub packages: Vec<ManagerReport>,
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            outcome: SyncOutcome::Error,
            error: None,
            blocked_by: None,
            snapshot: None,
            repo: None,
            conflicts: Vec::new(),
            scripts: None,
            files: None,
            packages: Vec::new(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match (self.outcome, &self.error) {
            (SyncOutcome::Success, _) => exit_code::SUCCESS,
            (SyncOutcome::Conflict, _) => exit_code::CONFLICT,
            (SyncOutcome::Error, Some(err)) => err.exit_code(),
            (SyncOutcome::Error, None) => exit_code::FAILURE,
        }
    }

    /// Packages that failed across all managers.
    pub fn failed_packages(&self) -> usize {
        self.packages.iter().map(|r| r.failed.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    store: &'a mut dyn StateStore,
    layout: StateLayout,
    probe: HostProbe,
    config_path: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        store: &'a mut dyn StateStore,
        layout: StateLayout,
        probe: HostProbe,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            store,
            layout,
            probe,
            config_path: config_path.into(),
        }
    }

    /// Run once. Never panics on run errors; they land in the report.
    pub fn run(&mut self) -> SyncReport {
        let mut report = SyncReport::new(Utc::now());
        match self.run_locked(&mut report) {
            Ok(outcome) => report.outcome = outcome,
            Err(err) => {
                tracing::error!(error = %err, "sync failed");
                report.outcome = SyncOutcome::Error;
                report.error = Some(err);
            }
        }
        tracing::info!(
            outcome = ?report.outcome,
            exit_code = report.exit_code(),
            elapsed_ms = (Utc::now() - report.started_at).num_milliseconds(),
            "sync finished",
        );
        report
    }

    fn run_locked(&mut self, report: &mut SyncReport) -> Result<SyncOutcome, SyncError> {
        // Released on every return path by Drop.
        let _lock = SyncLock::acquire(&self.layout.lock_path())?;

        let config = Config::load(&self.config_path)?;
        tracing::info!(repo = %config.repo_url, branch = %config.branch, "configuration loaded");

        if let Some(marker) = self.store.conflict_marker()? {
            tracing::error!(
                paths = ?marker.paths,
                since = %marker.created_at,
                "unresolved conflicts; run `fleetsync resolve` or `fleetsync restore`",
            );
            report.blocked_by = Some(marker);
            return Ok(SyncOutcome::Conflict);
        }

        let host = detect_host(&self.probe, config.container_user.as_deref())?;
        let home = primary_home(&host);
        let root = config_root(&config, &self.layout);
        let baseline = self.store.load_checksums(ChecksumGeneration::Baseline)?;

        // Managed set as known before the pull.
        let cached = if git::has_checkout(&self.layout.repo_dir()) {
            triplet::discover(&root.join("files"), home.as_deref())
        } else {
            Discovered::default()
        };
        let targets = conflict::managed_targets(baseline.as_ref(), &cached.files);

        report.snapshot = self.take_snapshot(&config, &targets);
        let current = conflict::record_current(&mut *self.store, &targets)?;

        report.repo = Some(git::sync_repo(
            self.runner,
            &config.repo_url,
            &config.branch,
            &self.layout.repo_dir(),
        )?);

        let discovered = triplet::discover(&root.join("files"), home.as_deref());
        let incoming = conflict::incoming_checksums(&discovered.files);
        let now = Utc::now();
        let conflicts = conflict::detect(baseline.as_ref(), &current, &incoming, now);
        if !conflicts.is_empty() {
            conflict::record_conflicts(&mut *self.store, &conflicts, now)?;
            report.conflicts = conflicts;
            return Ok(SyncOutcome::Conflict);
        }

        let helpers = config
            .helper_path
            .clone()
            .unwrap_or_else(|| self.layout.default_helper_path());
        scripts::write_helpers(&helpers)?;
        let env = ScriptEnv {
            first_run: self.store.last_sync()?.is_none(),
            repo_root: root.clone(),
            log_file: config.log_file.clone(),
            helpers,
            ..ScriptEnv::from_host(&host)
        };
        let script_report = scripts::execute(self.runner, &root.join("scripts"), &root, &env)?;
        let failed = script_report.failed_at.clone();
        report.scripts = Some(script_report);
        if let Some(failure) = failed {
            return Err(SyncError::ScriptFailed {
                script: failure.script,
                message: failure.message,
            });
        }

        let files = deploy::deploy(&discovered, Utc::now());
        report.packages = packages::install(self.runner, &self.probe, &root.join("packages"));

        let new_baseline = next_baseline(baseline.as_ref(), incoming, &files);
        report.files = Some(files);
        conflict::save_baseline(&mut *self.store, &new_baseline)?;
        self.finish_snapshots(&config, report.snapshot.as_ref());
        self.store.set_last_sync(Utc::now())?;
        self.store.clear_conflict_marker()?;

        if report.failed_packages() > 0 {
            tracing::warn!(failed = report.failed_packages(), "some packages failed to install");
        }
        Ok(SyncOutcome::Success)
    }

    /// Best-effort pre-sync snapshot.
    fn take_snapshot(
        &mut self,
        config: &Config,
        targets: &BTreeSet<String>,
    ) -> Option<SnapshotRecord> {
        if config.snapshot.mode == SnapshotMode::No {
            tracing::info!("snapshots disabled");
            return None;
        }
        let managed: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
        let mut manager = SnapshotManager::new(self.runner, config.snapshot.clone(), &self.layout);
        match manager.create(&mut *self.store, &managed) {
            Ok(record) => Some(record),
            Err(err) if config.snapshot.mode == SnapshotMode::Yes => {
                tracing::error!(error = %err, "snapshot failed; continuing without rollback safety");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "snapshot failed; continuing without rollback safety");
                None
            }
        }
    }

    fn finish_snapshots(&mut self, config: &Config, snapshot: Option<&SnapshotRecord>) {
        let manager = SnapshotManager::new(self.runner, config.snapshot.clone(), &self.layout);
        if let Some(record) = snapshot {
            if let Err(err) = manager.tag_good(&mut *self.store, &record.name) {
                tracing::warn!(snapshot = %record.name, error = %err, "could not tag snapshot");
            }
        }
        match manager.cleanup(&mut *self.store) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(removed = removed.len(), "snapshot retention applied")
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "snapshot cleanup failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Directory inside the checkout that holds `scripts/`, `files/`, `packages/`.
pub fn config_root(config: &Config, layout: &StateLayout) -> PathBuf {
    let repo = layout.repo_dir();
    if config.config_path.as_os_str().is_empty() {
        repo
    } else {
        repo.join(&config.config_path)
    }
}

/// Triplets in the cached checkout, for `status`, `resolve` and `restore`.
pub fn managed_files(
    config: &Config,
    layout: &StateLayout,
    probe: &HostProbe,
) -> Result<Discovered, SyncError> {
    let host = detect_host(probe, config.container_user.as_deref())?;
    let home = primary_home(&host);
    Ok(triplet::discover(
        &config_root(config, layout).join("files"),
        home.as_deref(),
    ))
}

fn primary_home(host: &HostInfo) -> Option<PathBuf> {
    host.primary_user.as_ref().map(|u| u.home.clone())
}

/// Incoming checksums, except that files that failed to deploy keep their
/// previous baseline entry.
fn next_baseline(
    previous: Option<&ChecksumTable>,
    mut incoming: ChecksumTable,
    files: &DeployReport,
) -> ChecksumTable {
    for result in &files.results {
        let (FileAction::Failed { .. }, Some(target)) = (&result.action, &result.target) else {
            continue;
        };
        let key = target.to_string_lossy().into_owned();
        match previous.and_then(|p| p.get(&key)) {
            Some(prev) => incoming.insert(key, prev.clone()),
            None => incoming.remove(&key),
        };
    }
    incoming
}
