//! Declarative package installation.
//!
//! Lists under `packages/` are selected by extension (`.apt`, `.apk`,
//! `.dnf`, `.npm`, `.pip`, `.custom`). Installed state is checked live on
//! every run; only missing packages are installed, in one batch per manager.
//! Failures are reported, never propagated.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use fleetsync_core::{CommandOutput, CommandRunner, CommandSpec};
use fleetsync_detector::HostProbe;

pub const DEFAULT_CUSTOM_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Managers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Apk,
    Dnf,
    Npm,
    Pip,
}

impl PackageManager {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "apt" => Some(Self::Apt),
            "apk" => Some(Self::Apk),
            "dnf" => Some(Self::Dnf),
            "npm" => Some(Self::Npm),
            "pip" => Some(Self::Pip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Apk => "apk",
            Self::Dnf => "dnf",
            Self::Npm => "npm",
            Self::Pip => "pip",
        }
    }

    /// Executables that must be on `PATH`.
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["apt-get", "dpkg-query"],
            Self::Apk => &["apk"],
            Self::Dnf => &["dnf", "rpm"],
            Self::Npm => &["npm"],
            Self::Pip => &["pip3"],
        }
    }

    pub fn refresh_command(&self) -> Option<CommandSpec> {
        match self {
            Self::Apt => Some(
                CommandSpec::new("apt-get")
                    .arg("update")
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            ),
            Self::Apk => Some(CommandSpec::new("apk").arg("update")),
            Self::Dnf => Some(CommandSpec::new("dnf").arg("makecache")),
            Self::Npm | Self::Pip => None,
        }
    }

    pub fn check_command(&self, name: &str) -> CommandSpec {
        match self {
            Self::Apt => CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", name]),
            Self::Apk => CommandSpec::new("apk").args(["info", "-e", name]),
            Self::Dnf => CommandSpec::new("rpm").args(["-q", name]),
            Self::Npm => CommandSpec::new("npm").args(["ls", "-g", "--depth=0", name]),
            Self::Pip => CommandSpec::new("pip3").args(["show", name]),
        }
    }

    pub fn is_installed(&self, output: &CommandOutput) -> bool {
        match self {
            Self::Apt => output.success() && output.stdout.contains("install ok installed"),
            _ => output.success(),
        }
    }

    pub fn install_command(&self, specs: &[String]) -> CommandSpec {
        let cmd = match self {
            Self::Apt => CommandSpec::new("apt-get")
                .args(["install", "-y", "--no-install-recommends"])
                .env("DEBIAN_FRONTEND", "noninteractive"),
            Self::Apk => CommandSpec::new("apk").arg("add"),
            Self::Dnf => CommandSpec::new("dnf").args(["install", "-y"]),
            Self::Npm => CommandSpec::new("npm").args(["install", "-g"]),
            Self::Pip => CommandSpec::new("pip3").arg("install"),
        };
        cmd.args(specs.iter().cloned())
    }

    /// Package name without its version pin, for the installed check.
    pub fn base_name<'a>(&self, spec: &'a str) -> &'a str {
        let cut = match self {
            Self::Apt => spec.find('='),
            Self::Apk => spec.find(['=', '<', '>', '~']),
            Self::Dnf => None,
            // Scoped packages start with '@'; the pin follows the last one.
            Self::Npm => spec.rfind('@').filter(|&idx| idx > 0),
            Self::Pip => spec.find(['=', '<', '>', '!', '~', '[', ';', ' ']),
        };
        cut.map_or(spec, |idx| &spec[..idx]).trim()
    }
}

// ---------------------------------------------------------------------------
// List parsing
// ---------------------------------------------------------------------------

/// One package per line. Blank lines and `#` comments (full-line or
/// trailing) are dropped.
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `name|check_cmd|install_cmd[|timeout=<secs>]`
///
/// `name` and `check_cmd` end at the first and second `|`. Everything after
/// that is the install command, pipes included, except a trailing
/// `|timeout=<secs>` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomPackage {
    pub name: String,
    pub check: String,
    pub install: String,
    pub timeout: Duration,
}

pub fn parse_custom_line(line: &str) -> Result<CustomPackage, String> {
    let mut fields = line.splitn(3, '|');
    let (Some(name), Some(check), Some(rest)) = (fields.next(), fields.next(), fields.next()) else {
        return Err("expected 'name|check_cmd|install_cmd[|timeout=N]'".to_string());
    };
    let (install, timeout) = match rest.rsplit_once('|') {
        Some((install, last)) if last.trim().starts_with("timeout=") => {
            let field = last.trim();
            let secs = field
                .strip_prefix("timeout=")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| v > 0)
                .ok_or_else(|| format!("invalid timeout field '{field}'"))?;
            (install, Duration::from_secs(secs))
        }
        None if rest.trim().starts_with("timeout=") => {
            return Err("install command missing before timeout field".to_string());
        }
        _ => (rest, DEFAULT_CUSTOM_TIMEOUT),
    };
    let (name, check, install) = (name.trim(), check.trim(), install.trim());
    if name.is_empty() || check.is_empty() || install.is_empty() {
        return Err("name, check and install commands must be non-empty".to_string());
    }
    Ok(CustomPackage {
        name: name.to_string(),
        check: check.to_string(),
        install: install.to_string(),
        timeout,
    })
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerReport {
    /// `apt`, `apk`, `dnf`, `npm`, `pip` or `custom`.
    pub manager: String,
    pub installed: Vec<String>,
    /// Already present.
    pub skipped: Vec<String>,
    pub failed: Vec<PackageFailure>,
}

impl ManagerReport {
    fn new(manager: &str) -> Self {
        Self {
            manager: manager.to_string(),
            installed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn fail(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(PackageFailure {
            name: name.into(),
            reason: reason.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// install
// ---------------------------------------------------------------------------

/// Install everything listed under `dir`. Reports come back in manager order
/// with `custom` last.
pub fn install(runner: &dyn CommandRunner, probe: &HostProbe, dir: &Path) -> Vec<ManagerReport> {
    let mut lists: BTreeMap<PackageManager, Vec<String>> = BTreeMap::new();
    let mut custom_lines: Vec<String> = Vec::new();
    let mut unreadable: Vec<(String, String)> = Vec::new();

    for (file, ext) in list_files(dir) {
        let path = dir.join(&file);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(file = %path.display(), error = %err, "cannot read package list");
                unreadable.push((ext, format!("cannot read {file}: {err}")));
                continue;
            }
        };
        if ext == "custom" {
            custom_lines.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string),
            );
        } else if let Some(pm) = PackageManager::from_extension(&ext) {
            let entry = lists.entry(pm).or_default();
            for pkg in parse_package_list(&text) {
                if !entry.contains(&pkg) {
                    entry.push(pkg);
                }
            }
        }
    }

    let mut reports: Vec<ManagerReport> = lists
        .into_iter()
        .map(|(pm, pkgs)| install_with_manager(runner, probe, pm, &pkgs))
        .collect();
    if !custom_lines.is_empty() {
        reports.push(install_custom(runner, &custom_lines));
    }
    for (ext, reason) in unreadable {
        match reports.iter_mut().find(|r| r.manager == ext) {
            Some(report) => report.fail(ext.clone(), reason),
            None => {
                let mut report = ManagerReport::new(&ext);
                report.fail(ext.clone(), reason);
                reports.push(report);
            }
        }
    }

    for report in &reports {
        tracing::info!(
            manager = %report.manager,
            installed = report.installed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "packages processed",
        );
    }
    reports
}

fn list_files(dir: &Path) -> Vec<(String, String)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot read packages directory");
            return Vec::new();
        }
    };
    let mut files: Vec<(String, String)> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .filter_map(|name| {
            let ext = Path::new(&name).extension()?.to_str()?.to_string();
            if ext == "custom" || PackageManager::from_extension(&ext).is_some() {
                Some((name, ext))
            } else {
                tracing::warn!(file = %name, "ignoring package list with unknown extension");
                None
            }
        })
        .collect();
    files.sort();
    files
}

fn install_with_manager(
    runner: &dyn CommandRunner,
    probe: &HostProbe,
    pm: PackageManager,
    packages: &[String],
) -> ManagerReport {
    let mut report = ManagerReport::new(pm.as_str());

    if let Some(tool) = pm.required_tools().iter().find(|t| !probe.has_executable(t)) {
        tracing::warn!(manager = pm.as_str(), tool, "package manager not available");
        for pkg in packages {
            report.fail(pkg.clone(), format!("{tool} not found on PATH"));
        }
        return report;
    }

    let mut missing = Vec::new();
    for pkg in packages {
        let check = pm.check_command(pm.base_name(pkg));
        match runner.run(&check) {
            Ok(out) if pm.is_installed(&out) => report.skipped.push(pkg.clone()),
            Ok(_) => missing.push(pkg.clone()),
            Err(err) => report.fail(pkg.clone(), err.to_string()),
        }
    }
    if missing.is_empty() {
        return report;
    }

    if let Some(refresh) = pm.refresh_command() {
        match runner.run(&refresh) {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(manager = pm.as_str(), reason = %out.summary(), "index refresh failed"),
            Err(err) => tracing::warn!(manager = pm.as_str(), error = %err, "index refresh failed"),
        }
    }

    tracing::info!(manager = pm.as_str(), packages = ?missing, "installing");
    match runner.run(&pm.install_command(&missing)) {
        Ok(out) if out.success() => report.installed.extend(missing),
        batch => {
            let reason = describe(&batch);
            tracing::warn!(manager = pm.as_str(), %reason, "batch install failed; retrying one at a time");
            for pkg in missing {
                match runner.run(&pm.install_command(std::slice::from_ref(&pkg))) {
                    Ok(out) if out.success() => report.installed.push(pkg),
                    single => {
                        let reason = describe(&single);
                        tracing::error!(manager = pm.as_str(), package = %pkg, %reason, "install failed");
                        report.fail(pkg, reason);
                    }
                }
            }
        }
    }
    report
}

fn install_custom(runner: &dyn CommandRunner, lines: &[String]) -> ManagerReport {
    let mut report = ManagerReport::new("custom");
    for line in lines {
        let pkg = match parse_custom_line(line) {
            Ok(pkg) => pkg,
            Err(reason) => {
                tracing::error!(%line, %reason, "malformed custom installer line");
                report.fail(line.clone(), reason);
                continue;
            }
        };

        let check = CommandSpec::new("sh").args(["-c", pkg.check.as_str()]).timeout(pkg.timeout);
        if matches!(runner.run(&check), Ok(out) if out.success()) {
            report.skipped.push(pkg.name);
            continue;
        }

        tracing::info!(package = %pkg.name, timeout_secs = pkg.timeout.as_secs(), "running custom installer");
        let install = CommandSpec::new("sh").args(["-c", pkg.install.as_str()]).timeout(pkg.timeout);
        match runner.run(&install) {
            Ok(out) if out.success() => report.installed.push(pkg.name),
            result => {
                if let Ok(out) = &result {
                    for line in out.stdout.lines().chain(out.stderr.lines()) {
                        tracing::warn!(package = %pkg.name, "{line}");
                    }
                }
                let reason = describe(&result);
                tracing::error!(package = %pkg.name, %reason, "custom installer failed");
                report.fail(pkg.name, reason);
            }
        }
    }
    report
}

fn describe(result: &Result<CommandOutput, fleetsync_core::ExecError>) -> String {
    match result {
        Ok(out) => out.summary(),
        Err(err) => err.to_string(),
    }
}
