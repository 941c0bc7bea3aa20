//! Subscriber setup: stderr for the service journal, plus an appended log
//! file for commands that change the host. The file is size-rotated at
//! startup: `fleetsync.log` → `.1` → … → `.5`, the oldest overwritten.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleetsync_core::{config::DEFAULT_LOG_FILE, Config};

/// 10 MiB.
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_GENERATIONS: usize = 5;

/// `RUST_LOG` overrides the default level (`info` when `to_file`, else `warn`).
pub fn init(config_path: &Path, to_file: bool) {
    let default = if to_file { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut problems = Vec::new();
    let file_layer = if to_file {
        let log = LogFile::new(
            Config::peek_log_file(config_path).unwrap_or_else(|| DEFAULT_LOG_FILE.into()),
        );
        if let Err(err) = log.rotate() {
            problems.push(format!("log rotation failed for {}: {err}", log.path.display()));
        }
        match log.open() {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(err) => {
                problems.push(format!(
                    "cannot open log file {}: {err}; logging to stderr only",
                    log.path.display()
                ));
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .try_init();

    for problem in problems {
        tracing::warn!("{problem}");
    }
}

// ---------------------------------------------------------------------------
// Log file
// ---------------------------------------------------------------------------

struct LogFile {
    path: PathBuf,
    rotate_at: u64,
    keep: usize,
}

impl LogFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            rotate_at: ROTATE_AT_BYTES,
            keep: KEEP_GENERATIONS,
        }
    }

    /// `<path>.<n>`; generation 1 is the newest.
    fn generation(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Shift generations up by one once the live log reaches `rotate_at`.
    /// Returns whether it rotated. A missing log is not an error.
    fn rotate(&self) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= self.rotate_at => {}
            Ok(_) => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        }
        if self.keep == 0 {
            fs::remove_file(&self.path)?;
            return Ok(true);
        }
        // Renaming onto the last generation replaces it.
        for n in (1..self.keep).rev() {
            let older = self.generation(n);
            if older.exists() {
                fs::rename(&older, self.generation(n + 1))?;
            }
        }
        fs::rename(&self.path, self.generation(1))?;
        Ok(true)
    }

    fn open(&self) -> io::Result<File> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}
