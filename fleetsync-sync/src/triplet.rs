//! File-triplet discovery under `files/`.
//!
//! `files/<name>` is the content, `files/<name>.path` holds the target
//! directory and `files/<name>.policy` the overwrite policy. The target file
//! is `<dir>/<name>`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fleetsync_core::Policy;

pub const PATH_SUFFIX: &str = ".path";
pub const POLICY_SUFFIX: &str = ".policy";

/// One deployable file from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub policy: Policy,
    /// `.policy` side-car was absent and `default` was assumed.
    pub policy_defaulted: bool,
}

impl ManagedFile {
    /// Checksum table key.
    pub fn key(&self) -> String {
        self.target.to_string_lossy().into_owned()
    }
}

/// A content file whose side-cars are missing or invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTriplet {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub files: Vec<ManagedFile>,
    pub invalid: Vec<InvalidTriplet>,
}

/// Scan `files_dir`. A missing directory yields nothing. `home` expands a
/// leading `~` in `.path` side-cars.
pub fn discover(files_dir: &Path, home: Option<&Path>) -> Discovered {
    let mut found = Discovered::default();
    let entries = match fs::read_dir(files_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return found,
        Err(err) => {
            tracing::warn!(dir = %files_dir.display(), error = %err, "cannot read files directory");
            return found;
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            !name.starts_with('.') && !name.ends_with(PATH_SUFFIX) && !name.ends_with(POLICY_SUFFIX)
        })
        .collect();
    names.sort();

    for name in names {
        match load_triplet(files_dir, &name, home) {
            Ok(file) => found.files.push(file),
            Err(reason) => {
                tracing::error!(file = %name, %reason, "skipping invalid file triplet");
                found.invalid.push(InvalidTriplet { name, reason });
            }
        }
    }
    found
}

fn load_triplet(files_dir: &Path, name: &str, home: Option<&Path>) -> Result<ManagedFile, String> {
    let source = files_dir.join(name);
    let path_file = files_dir.join(format!("{name}{PATH_SUFFIX}"));
    let raw_dir = match fs::read_to_string(&path_file) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(format!("missing {name}{PATH_SUFFIX}"));
        }
        Err(err) => return Err(format!("cannot read {}: {err}", path_file.display())),
    };
    let target_dir = expand_target_dir(raw_dir.trim(), home)?;

    let policy_file = files_dir.join(format!("{name}{POLICY_SUFFIX}"));
    let (policy, policy_defaulted) = match fs::read_to_string(&policy_file) {
        Ok(contents) => (contents.parse::<Policy>()?, false),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::warn!(file = %name, "no {POLICY_SUFFIX} side-car; using 'default'");
            (Policy::Default, true)
        }
        Err(err) => return Err(format!("cannot read {}: {err}", policy_file.display())),
    };

    Ok(ManagedFile {
        name: name.to_string(),
        source,
        target: target_dir.join(name),
        policy,
        policy_defaulted,
    })
}

/// `~` and `~/x` expand to `home`; the result must be absolute.
pub fn expand_target_dir(raw: &str, home: Option<&Path>) -> Result<PathBuf, String> {
    if raw.is_empty() {
        return Err("empty target directory".to_string());
    }
    let expanded = if raw == "~" || raw.starts_with("~/") {
        let home = home.ok_or_else(|| format!("'{raw}' needs a primary user home"))?;
        match raw.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home.to_path_buf(),
        }
    } else {
        PathBuf::from(raw)
    };
    if !expanded.is_absolute() {
        return Err(format!("target directory '{raw}' is not absolute"));
    }
    Ok(expanded)
}
