//! Agent configuration: a flat `KEY=value` file written by the provisioning
//! system.
//!
//! ```text
//! # /etc/fleetsync/fleetsync.conf
//! CONFIG_REPO_URL=https://git.example.com/fleet/config.git
//! CONFIG_BRANCH=main
//! CONFIG_PATH=containers/web
//! SNAPSHOT_RETENTION_DAYS=7
//! ```
//!
//! Blank lines and `#` comments are ignored, values may be single- or
//! double-quoted, and a leading `export ` is accepted so the file can double
//! as a shell fragment. Unknown keys are warned about and ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fleetsync/fleetsync.conf";
pub const DEFAULT_LOG_FILE: &str = "/var/log/fleetsync/fleetsync.log";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_LVM_SNAPSHOT_SIZE: &str = "1G";
pub const DEFAULT_SNAPSHOT_PREFIX: &str = "fleetsync";

const KNOWN_KEYS: &[&str] = &[
    "CONFIG_REPO_URL",
    "CONFIG_BRANCH",
    "CONFIG_PATH",
    "CONFIG_HELPER_PATH",
    "CONFIG_CONTAINER_USER",
    "SNAPSHOT_ENABLED",
    "SNAPSHOT_RETENTION_DAYS",
    "SNAPSHOT_BACKEND",
    "LVM_SNAPSHOT_SIZE",
    "SNAPSHOT_PREFIX",
    "LOG_FILE",
];

// ---------------------------------------------------------------------------
// Settings enums
// ---------------------------------------------------------------------------

/// `SNAPSHOT_ENABLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    #[default]
    Auto,
    Yes,
    No,
}

impl FromStr for SnapshotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "yes" | "true" | "1" => Ok(Self::Yes),
            "no" | "false" | "0" => Ok(Self::No),
            other => Err(format!("'{other}'; expected: auto, yes, no")),
        }
    }
}

/// `SNAPSHOT_BACKEND`. `None` pins the file-level fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    #[default]
    Auto,
    Zfs,
    Lvm,
    Btrfs,
    None,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "zfs" => Ok(Self::Zfs),
            "lvm" => Ok(Self::Lvm),
            "btrfs" => Ok(Self::Btrfs),
            "none" => Ok(Self::None),
            other => Err(format!("'{other}'; expected: auto, zfs, lvm, btrfs, none")),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Zfs => "zfs",
            Self::Lvm => "lvm",
            Self::Btrfs => "btrfs",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Snapshot-related settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub mode: SnapshotMode,
    /// `0` keeps snapshots forever.
    pub retention_days: u32,
    pub backend: BackendChoice,
    pub lvm_size: String,
    pub prefix: String,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            mode: SnapshotMode::Auto,
            retention_days: DEFAULT_RETENTION_DAYS,
            backend: BackendChoice::Auto,
            lvm_size: DEFAULT_LVM_SNAPSHOT_SIZE.to_string(),
            prefix: DEFAULT_SNAPSHOT_PREFIX.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Validated agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub repo_url: String,
    pub branch: String,
    /// Sub-path inside the repository holding `scripts/`, `files/`, `packages/`.
    pub config_path: PathBuf,
    /// Where the script helper library is written; `None` uses the state dir.
    pub helper_path: Option<PathBuf>,
    /// Explicit container user; `None` means auto-detect.
    pub container_user: Option<String>,
    pub snapshot: SnapshotSettings,
    pub log_file: PathBuf,
}

impl Config {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&contents, path)
    }

    /// Parse and validate configuration text. `origin` is used in error messages.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let values = parse_pairs(contents, origin)?;
        for key in values.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, path = %origin.display(), "ignoring unknown configuration key");
            }
        }
        let get = |key: &str| values.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let repo_url = get("CONFIG_REPO_URL")
            .ok_or(ConfigError::MissingKey {
                key: "CONFIG_REPO_URL",
            })?
            .to_string();
        if !is_valid_repo_url(&repo_url) {
            return Err(ConfigError::Invalid {
                key: "CONFIG_REPO_URL",
                message: format!("'{repo_url}' is not an http(s) or ssh git URL"),
            });
        }

        let branch = get("CONFIG_BRANCH").unwrap_or(DEFAULT_BRANCH).to_string();
        if branch.chars().any(char::is_whitespace) || branch.starts_with('-') {
            return Err(ConfigError::Invalid {
                key: "CONFIG_BRANCH",
                message: format!("'{branch}' is not a valid branch name"),
            });
        }

        let config_path = PathBuf::from(get("CONFIG_PATH").unwrap_or(""));
        if config_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ConfigError::Invalid {
                key: "CONFIG_PATH",
                message: format!(
                    "'{}' must be a relative path inside the repository",
                    config_path.display()
                ),
            });
        }

        let helper_path = get("CONFIG_HELPER_PATH").map(PathBuf::from);
        if let Some(helper) = &helper_path {
            if !helper.is_absolute() {
                return Err(ConfigError::Invalid {
                    key: "CONFIG_HELPER_PATH",
                    message: format!("'{}' must be absolute", helper.display()),
                });
            }
        }

        let container_user = get("CONFIG_CONTAINER_USER").map(str::to_string);
        if let Some(user) = &container_user {
            if !user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(ConfigError::Invalid {
                    key: "CONFIG_CONTAINER_USER",
                    message: format!("'{user}' is not a valid user name"),
                });
            }
        }

        let mut snapshot = SnapshotSettings::default();
        if let Some(mode) = get("SNAPSHOT_ENABLED") {
            snapshot.mode = mode.parse().map_err(|message| ConfigError::Invalid {
                key: "SNAPSHOT_ENABLED",
                message,
            })?;
        }
        if let Some(days) = get("SNAPSHOT_RETENTION_DAYS") {
            snapshot.retention_days = days.parse().map_err(|_| ConfigError::Invalid {
                key: "SNAPSHOT_RETENTION_DAYS",
                message: format!("'{days}' is not a non-negative integer"),
            })?;
        }
        if let Some(backend) = get("SNAPSHOT_BACKEND") {
            snapshot.backend = backend.parse().map_err(|message| ConfigError::Invalid {
                key: "SNAPSHOT_BACKEND",
                message,
            })?;
        }
        if let Some(size) = get("LVM_SNAPSHOT_SIZE") {
            snapshot.lvm_size = size.to_string();
        }
        if let Some(prefix) = get("SNAPSHOT_PREFIX") {
            if !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            {
                return Err(ConfigError::Invalid {
                    key: "SNAPSHOT_PREFIX",
                    message: format!("'{prefix}' may only contain letters, digits, '-' and '_'"),
                });
            }
            snapshot.prefix = prefix.to_string();
        }

        let log_file = PathBuf::from(get("LOG_FILE").unwrap_or(DEFAULT_LOG_FILE));
        if !log_file.is_absolute() {
            return Err(ConfigError::Invalid {
                key: "LOG_FILE",
                message: format!("'{}' must be absolute", log_file.display()),
            });
        }

        Ok(Self {
            repo_url,
            branch,
            config_path,
            helper_path,
            container_user,
            snapshot,
            log_file,
        })
    }

    /// Read only `LOG_FILE`, tolerating an otherwise invalid file. Used to set
    /// up logging before validation so that config errors are logged too.
    pub fn peek_log_file(path: &Path) -> Option<PathBuf> {
        let contents = std::fs::read_to_string(path).ok()?;
        let values = parse_pairs(&contents, path).ok()?;
        values
            .get("LOG_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

fn parse_pairs(contents: &str, origin: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut values = BTreeMap::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Malformed {
                path: origin.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Malformed {
                path: origin.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            });
        }
        values.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(values)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    // Unquoted values may carry a trailing ` # comment`.
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

fn is_valid_repo_url(url: &str) -> bool {
    if url.chars().any(char::is_whitespace) {
        return false;
    }
    for scheme in ["https://", "http://", "ssh://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            return !rest.is_empty() && !rest.starts_with('/');
        }
    }
    // scp-style: user@host:path
    match (url.find('@'), url.find(':')) {
        (Some(at), Some(colon)) => {
            at > 0 && colon > at + 1 && colon + 1 < url.len() && !url[..colon].contains('/')
        }
        _ => false,
    }
}
