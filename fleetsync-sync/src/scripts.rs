//! Ordered script execution.
//!
//! Scripts are the regular, non-hidden files directly inside `scripts/`,
//! run in byte order of their names with `bash <script>`. The first
//! non-zero exit stops the chain.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use fleetsync_core::{state::write_text_atomic, CommandRunner, CommandSpec};
use fleetsync_detector::HostInfo;

use crate::SyncError;

/// Shell library scripts source with `. "$FLEETSYNC_HELPERS"`.
pub const HELPER_LIBRARY: &str = r#"# fleetsync helper library. Regenerated on every sync; do not edit.

fs_log_info() { printf '[fleetsync] INFO: %s\n' "$*"; }
fs_log_warn() { printf '[fleetsync] WARN: %s\n' "$*" >&2; }
fs_log_error() { printf '[fleetsync] ERROR: %s\n' "$*" >&2; }

# fs_exists <command>: true when <command> is on PATH.
fs_exists() { command -v "$1" >/dev/null 2>&1; }

# fs_ensure_installed <pkg>...: install missing packages with the detected manager.
fs_ensure_installed() {
    for pkg in "$@"; do
        case "$FLEETSYNC_PACKAGE_MANAGER" in
            apt)
                dpkg-query -W -f='${Status}' "$pkg" 2>/dev/null | grep -q 'install ok installed' && continue
                DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends "$pkg" || return 1
                ;;
            apk)
                apk info -e "$pkg" >/dev/null 2>&1 && continue
                apk add "$pkg" || return 1
                ;;
            dnf)
                rpm -q "$pkg" >/dev/null 2>&1 && continue
                dnf install -y "$pkg" || return 1
                ;;
            *)
                fs_log_error "no supported package manager for $pkg"
                return 1
                ;;
        esac
    done
}
"#;

/// Environment every script inherits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptEnv {
    pub os_family: String,
    pub os_version: String,
    pub primary_user: String,
    pub primary_home: String,
    pub package_manager: String,
    pub first_run: bool,
    pub repo_root: PathBuf,
    pub log_file: PathBuf,
    pub helpers: PathBuf,
}

impl ScriptEnv {
    pub fn from_host(host: &HostInfo) -> Self {
        let (primary_user, primary_home) = host
            .primary_user
            .as_ref()
            .map(|u| (u.name.clone(), u.home.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Self {
            os_family: host.os.id.clone(),
            os_version: host.os.version_id.clone(),
            primary_user,
            primary_home,
            package_manager: host
                .package_manager
                .map(|pm| pm.as_str().to_string())
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn vars(&self) -> Vec<(String, String)> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        [
            ("FLEETSYNC_OS_FAMILY", self.os_family.clone()),
            ("FLEETSYNC_OS_VERSION", self.os_version.clone()),
            ("FLEETSYNC_PRIMARY_USER", self.primary_user.clone()),
            ("FLEETSYNC_PRIMARY_HOME", self.primary_home.clone()),
            ("FLEETSYNC_PACKAGE_MANAGER", self.package_manager.clone()),
            ("FLEETSYNC_FIRST_RUN", if self.first_run { "1" } else { "0" }.to_string()),
            ("FLEETSYNC_REPO_ROOT", path(&self.repo_root)),
            ("FLEETSYNC_LOG", path(&self.log_file)),
            ("FLEETSYNC_HELPERS", path(&self.helpers)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptFailure {
    pub script: String,
    pub code: Option<i32>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptReport {
    pub executed: Vec<String>,
    /// Never started because an earlier script failed.
    pub skipped: Vec<String>,
    pub failed_at: Option<ScriptFailure>,
}

/// Write the helper library.
pub fn write_helpers(path: &Path) -> Result<(), SyncError> {
    write_text_atomic(path, HELPER_LIBRARY)?;
    Ok(())
}

/// Script file names in execution order. Missing directory yields none.
pub fn discover(dir: &Path) -> Result<Vec<String>, SyncError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(crate::error::io_err(dir, err)),
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    // `String` ordering is byte ordering.
    names.sort();
    Ok(names)
}

/// Run every script in `dir` with `cwd` as working directory.
pub fn execute(
    runner: &dyn CommandRunner,
    dir: &Path,
    cwd: &Path,
    env: &ScriptEnv,
) -> Result<ScriptReport, SyncError> {
    let names = discover(dir)?;
    let vars = env.vars();
    let mut report = ScriptReport::default();

    for (idx, name) in names.iter().enumerate() {
        let script = dir.join(name);
        let mut spec = CommandSpec::new("bash")
            .arg(script.to_string_lossy())
            .current_dir(cwd);
        for (key, value) in &vars {
            spec = spec.env(key.clone(), value.clone());
        }

        tracing::info!(script = %name, "running script");
        let failure = match runner.run(&spec) {
            Ok(output) => {
                log_output(name, &output.stdout, &output.stderr);
                if output.success() {
                    report.executed.push(name.clone());
                    continue;
                }
                ScriptFailure {
                    script: name.clone(),
                    code: output.code,
                    message: output.summary(),
                }
            }
            Err(err) => ScriptFailure {
                script: name.clone(),
                code: None,
                message: err.to_string(),
            },
        };

        tracing::error!(script = %name, code = ?failure.code, message = %failure.message, "script failed; halting");
        report.skipped = names[idx + 1..].to_vec();
        report.failed_at = Some(failure);
        break;
    }
    Ok(report)
}

fn log_output(script: &str, stdout: &str, stderr: &str) {
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(script, "{line}");
    }
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        tracing::warn!(script, "{line}");
    }
}
