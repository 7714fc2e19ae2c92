//! Baseline record storage
//!
//! A [`RecordStore`] persists one [`FileRecord`] per path. Two backends are
//! interchangeable from the orchestrators' point of view:
//! - [`SqliteStore`]: a single `files` table keyed on path
//! - [`CsvStore`]: one flat comma-delimited file, rewritten in full per scan
//!
//! [`MemoryStore`] holds records in memory only and is what the
//! orchestrator tests run against.

pub mod csv_file;
pub mod memory;
pub mod sqlite;

pub use csv_file::CsvStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Baseline entry for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(serialize_with = "serialize_path")]
    pub path: PathBuf,
    pub checksum: String,
    pub scanned_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, checksum: impl Into<String>, scanned_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
            scanned_at,
        }
    }
}

/// Every record in a storage scope, keyed (and ordered) by path
pub type Snapshot = BTreeMap<PathBuf, FileRecord>;

pub trait RecordStore {
    /// Look up the record for one path.
    fn load(&self, path: &Path) -> Result<Option<FileRecord>>;

    /// Insert a record, replacing any existing record for the same path.
    fn upsert(&mut self, record: FileRecord) -> Result<()>;

    /// Every record in the storage scope.
    fn load_all(&self) -> Result<Snapshot>;

    /// Make the upserts of this run durable. Until this returns `Ok`, the
    /// previous baseline is what a later run will see.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable description of the storage target.
    fn describe(&self) -> String;
}

/// Which backend to use, and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", content = "target", rename_all = "lowercase")]
pub enum StorageTarget {
    Database(PathBuf),
    Csv(PathBuf),
}

impl StorageTarget {
    pub fn path(&self) -> &Path {
        match self {
            StorageTarget::Database(path) | StorageTarget::Csv(path) => path,
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTarget::Database(path) => write!(f, "database {}", path.display()),
            StorageTarget::Csv(path) => write!(f, "CSV file {}", path.display()),
        }
    }
}

/// Open the backend selected by `target`.
///
/// Fails with a storage error when the target cannot be created or read;
/// there is no fallback to the other backend.
pub fn open_store(target: &StorageTarget) -> Result<Box<dyn RecordStore>> {
    let store: Box<dyn RecordStore> = match target {
        StorageTarget::Database(path) => Box::new(SqliteStore::open(path)?),
        StorageTarget::Csv(path) => Box::new(CsvStore::open(path)?),
    };
    tracing::debug!("Opened {}", store.describe());
    Ok(store)
}

/// Open the baseline selected by `target` for a check run.
///
/// Unlike [`open_store`], nothing is created when the target does not
/// exist; the run compares against an empty baseline instead.
pub fn open_baseline(target: &StorageTarget) -> Result<Box<dyn RecordStore>> {
    if !target.path().exists() {
        tracing::warn!(
            "No baseline at {}; every file will be reported new (run `checkr scan` first)",
            target
        );
        return Ok(Box::new(MemoryStore::labelled(format!(
            "empty baseline ({} does not exist)",
            target
        ))));
    }
    open_store(target)
}

/// Timestamps are stored as RFC 3339 text, which sorts chronologically.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text.trim()).map(|ts| ts.with_timezone(&Utc))
}

/// Raw bytes of a path as the persistent backends store them.
///
/// On Unix this is the exact byte string of the file name, so names that
/// are not valid UTF-8 still match their record on the next run.
#[cfg(unix)]
pub(crate) fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
pub(crate) fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

// Elsewhere paths are stored as UTF-8; parts that are not valid Unicode
// are replaced.
#[cfg(not(unix))]
pub(crate) fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
pub(crate) fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Serialize a path as text, replacing bytes that are not UTF-8 so that
/// reports never fail on unusual file names.
pub(crate) fn serialize_path<S: serde::Serializer>(path: &Path, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}
