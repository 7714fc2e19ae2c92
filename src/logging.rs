//! Logging setup
//!
//! Installs a global tracing subscriber with two outputs: stderr, filtered by
//! the `-v` count, and a log file that always records debug detail. The log
//! file is rotated by size at start-up, keeping a bounded number of backups.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Rotate once the log grows past this size.
const MAX_LOG_BYTES: u64 = 1024 * 1024;
/// Number of rotated log files to keep (`checkr.log.1` .. `checkr.log.5`).
const MAX_BACKUPS: usize = 5;

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create the directory holding the log file.
    #[error("Failed to prepare log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to move an old log file out of the way.
    #[error("Failed to rotate log file {}: {source}", .path.display())]
    Rotate {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The log path has no file name component.
    #[error("Log path {} does not name a file", .0.display())]
    NotAFile(PathBuf),
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Console level for a `-v` count: none = ERROR, `-v` = INFO, `-vv` = DEBUG.
pub fn console_level(verbosity: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbosity) {
        (true, _) | (false, 0) => LevelFilter::ERROR,
        (false, 1) => LevelFilter::INFO,
        (false, _) => LevelFilter::DEBUG,
    }
}

/// Initialize tracing to write to stderr and to `log_file`.
///
/// The returned guard flushes the file writer when dropped, so the caller
/// keeps it alive until the process exits. `RUST_LOG`, when set, replaces
/// the console filter.
pub fn init(verbosity: u8, quiet: bool, log_file: &Path) -> Result<WorkerGuard, LoggingError> {
    let file_name = log_file
        .file_name()
        .ok_or_else(|| LoggingError::NotAFile(log_file.to_path_buf()))?;
    let log_dir = match log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    fs::create_dir_all(&log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.clone(),
        source,
    })?;
    rotate_if_needed(log_file, MAX_LOG_BYTES, MAX_BACKUPS)?;

    let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(console_level(verbosity, quiet).into()));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(LevelFilter::DEBUG);

    let subscriber = Registry::default().with(console_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("Logging initialized; log file at {}", log_file.display());
    Ok(guard)
}

/// Shift `log` to `log.1`, `log.1` to `log.2` and so on once `log` is
/// larger than `max_bytes`. The oldest backup is discarded.
fn rotate_if_needed(log: &Path, max_bytes: u64, backups: usize) -> Result<(), LoggingError> {
    let size = match fs::metadata(log) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(()),
    };
    if size <= max_bytes || backups == 0 {
        return Ok(());
    }

    let rotate_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| LoggingError::Rotate { path, source }
    };

    let oldest = backup_path(log, backups);
    if oldest.exists() {
        fs::remove_file(&oldest).map_err(rotate_err(&oldest))?;
    }
    for n in (1..backups).rev() {
        let from = backup_path(log, n);
        if from.exists() {
            fs::rename(&from, backup_path(log, n + 1)).map_err(rotate_err(&from))?;
        }
    }
    fs::rename(log, backup_path(log, 1)).map_err(rotate_err(log))?;
    Ok(())
}

fn backup_path(log: &Path, n: usize) -> PathBuf {
    let mut name = log.as_os_str().to_owned();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}
