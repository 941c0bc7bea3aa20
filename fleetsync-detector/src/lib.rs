//! Host detection for `fleetsync-detector`.
//!
//! `detect_host(probe, user)` inspects indicator files under a filesystem
//! root (normally `/`) and the executable search path, and returns the OS
//! family and version, the primary container user, and the system package
//! manager. Everything reads through a [`HostProbe`] so tests can point it at
//! a temporary tree.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Lowest UID considered a regular (human) account.
pub const FIRST_REGULAR_UID: u32 = 1000;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Fields of `/etc/os-release` that scripts care about.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OsRelease {
    /// `ID`, e.g. `"debian"`, `"alpine"`, `"fedora"`. `"linux"` when unknown.
    pub id: String,
    /// `VERSION_ID`, empty when absent (rolling releases).
    pub version_id: String,
    /// `ID_LIKE`, split on whitespace.
    pub id_like: Vec<String>,
}

/// One `/etc/passwd` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

impl UserAccount {
    /// `false` for `nologin`, `false` and empty shells.
    pub fn has_login_shell(&self) -> bool {
        let shell = self.shell.trim();
        !(shell.is_empty() || shell.ends_with("/nologin") || shell.ends_with("/false"))
    }
}

/// Distribution package manager found on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPackageManager {
    Apt,
    Apk,
    Dnf,
}

impl SystemPackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemPackageManager::Apt => "apt",
            SystemPackageManager::Apk => "apk",
            SystemPackageManager::Dnf => "dnf",
        }
    }
}

impl fmt::Display for SystemPackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything detected about the host for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub os: OsRelease,
    pub primary_user: Option<UserAccount>,
    pub package_manager: Option<SystemPackageManager>,
}

/// Where detection looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProbe {
    /// Filesystem root holding `etc/os-release` and `etc/passwd`.
    pub root: PathBuf,
    /// Directories searched for executables, in order.
    pub path_dirs: Vec<PathBuf>,
}

impl HostProbe {
    /// Probe the running system: `/` and the `PATH` environment variable.
    pub fn system() -> Self {
        let path_dirs = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect())
            .unwrap_or_else(|| {
                ["/usr/local/sbin", "/usr/local/bin", "/usr/sbin", "/usr/bin", "/sbin", "/bin"]
                    .iter()
                    .map(PathBuf::from)
                    .collect()
            });
        Self {
            root: PathBuf::from("/"),
            path_dirs,
        }
    }

    pub fn new(root: impl Into<PathBuf>, path_dirs: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_dirs,
        }
    }

    /// First match for `name` on the search path.
    pub fn find_executable(&self, name: &str) -> Option<PathBuf> {
        self.path_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    pub fn has_executable(&self, name: &str) -> bool {
        self.find_executable(name).is_some()
    }
}

/// Errors from host detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `CONFIG_CONTAINER_USER` names an account missing from `/etc/passwd`.
    #[error("configured container user '{name}' does not exist")]
    UnknownUser { name: String },
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect OS, primary user and package manager.
///
/// `configured_user` (from `CONFIG_CONTAINER_USER`) wins over auto-detection
/// and must exist.
pub fn detect_host(
    probe: &HostProbe,
    configured_user: Option<&str>,
) -> Result<HostInfo, DetectError> {
    let os = read_os_release(&probe.root)?;
    let accounts = read_passwd(&probe.root)?;
    let primary_user = match configured_user {
        Some(name) => Some(
            accounts
                .iter()
                .find(|a| a.name == name)
                .cloned()
                .ok_or_else(|| DetectError::UnknownUser {
                    name: name.to_string(),
                })?,
        ),
        None => detect_primary_user(&accounts),
    };
    let package_manager = detect_package_manager(probe, &os);

    Ok(HostInfo {
        os,
        primary_user,
        package_manager,
    })
}

/// Read `<root>/etc/os-release`, falling back to `<root>/usr/lib/os-release`.
pub fn read_os_release(root: &Path) -> Result<OsRelease, DetectError> {
    for candidate in ["etc/os-release", "usr/lib/os-release"] {
        let path = root.join(candidate);
        match fs::read_to_string(&path) {
            Ok(text) => return Ok(parse_os_release(&text)),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(DetectError::Io { path, source }),
        }
    }
    Ok(OsRelease {
        id: "linux".to_string(),
        ..OsRelease::default()
    })
}

pub fn parse_os_release(text: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "ID" => release.id = value.to_ascii_lowercase(),
            "VERSION_ID" => release.version_id = value.to_string(),
            "ID_LIKE" => {
                release.id_like = value
                    .split_whitespace()
                    .map(str::to_ascii_lowercase)
                    .collect()
            }
            _ => {}
        }
    }
    if release.id.is_empty() {
        release.id = "linux".to_string();
    }
    release
}

/// Parse `<root>/etc/passwd`. A missing file yields no accounts.
pub fn read_passwd(root: &Path) -> Result<Vec<UserAccount>, DetectError> {
    let path = root.join("etc/passwd");
    match fs::read_to_string(&path) {
        Ok(text) => Ok(parse_passwd(&text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(DetectError::Io { path, source }),
    }
}

/// Malformed lines are skipped.
pub fn parse_passwd(text: &str) -> Vec<UserAccount> {
    text.lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(UserAccount {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                home: PathBuf::from(fields[5]),
                shell: fields[6].to_string(),
            })
        })
        .collect()
}

/// First account (file order) with UID ≥ 1000 and a real login shell.
pub fn detect_primary_user(accounts: &[UserAccount]) -> Option<UserAccount> {
    accounts
        .iter()
        .find(|a| a.uid >= FIRST_REGULAR_UID && a.uid != 65534 && a.has_login_shell())
        .cloned()
}

/// Pick the package manager by executable presence, preferring the one the
/// OS family suggests when several are installed.
pub fn detect_package_manager(probe: &HostProbe, os: &OsRelease) -> Option<SystemPackageManager> {
    let family = std::iter::once(os.id.as_str()).chain(os.id_like.iter().map(String::as_str));
    let mut preferred = None;
    for id in family {
        preferred = match id {
            "debian" | "ubuntu" => Some(SystemPackageManager::Apt),
            "alpine" => Some(SystemPackageManager::Apk),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Some(SystemPackageManager::Dnf),
            _ => None,
        };
        if preferred.is_some() {
            break;
        }
    }

    let available = |pm: SystemPackageManager| match pm {
        SystemPackageManager::Apt => probe.has_executable("apt-get"),
        SystemPackageManager::Apk => probe.has_executable("apk"),
        SystemPackageManager::Dnf => probe.has_executable("dnf") || probe.has_executable("yum"),
    };

    if let Some(pm) = preferred.filter(|pm| available(*pm)) {
        return Some(pm);
    }
    [
        SystemPackageManager::Apt,
        SystemPackageManager::Apk,
        SystemPackageManager::Dnf,
    ]
    .into_iter()
    .find(|pm| available(*pm))
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
