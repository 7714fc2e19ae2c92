//! Baseline recording: digest every file under the roots and store it

use crate::checksum::{self, Algorithm};
use crate::config::RunConfig;
use crate::enumerator;
use crate::error::{Result, RootError};
use crate::scan_events::ScanProgressEvent;
use crate::store::{FileRecord, RecordStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcome {
    Written,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    #[serde(serialize_with = "crate::store::serialize_path")]
    pub path: PathBuf,
    pub outcome: ScanOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub written: usize,
    pub errored: usize,
}

/// Everything a scan run did, in enumeration order
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub algorithm: Algorithm,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ScanEntry>,
    pub summary: ScanSummary,
    pub root_errors: Vec<RootError>,
    /// Directories below a root that could not be read; their existing
    /// records were left as they were
    pub walk_errors: Vec<RootError>,
}

/// Record a fresh baseline for every file under the configured roots.
///
/// Each file's record is overwritten unconditionally; the previous baseline
/// is never consulted. A file that cannot be read becomes an error entry and
/// the run carries on. A storage failure aborts the run, and because
/// [`RecordStore::commit`] is never reached the partial run is not presented
/// as a baseline.
pub fn scan<F>(config: &RunConfig, store: &mut dyn RecordStore, on_progress: F) -> Result<ScanResult>
where
    F: Fn(ScanProgressEvent) + Sync,
{
    let started_at = Utc::now();
    let discovery = enumerator::discover(&config.roots, config.recursive);
    info!(
        "Scanning {} files with {} into {}",
        discovery.files.len(),
        config.algorithm,
        store.describe()
    );

    on_progress(ScanProgressEvent::Started {
        total_files: discovery.files.len() as u64,
    });
    let digests = checksum::digest_files(&discovery.files, config.algorithm, config.workers, |path| {
        on_progress(ScanProgressEvent::FileDone {
            path: path.to_path_buf(),
        })
    })?;
    on_progress(ScanProgressEvent::Finished {
        processed: digests.len() as u64,
    });

    let mut entries = Vec::with_capacity(discovery.files.len());
    let mut summary = ScanSummary::default();

    for (path, digest) in discovery.files.into_iter().zip(digests) {
        match digest {
            Ok(digest) => {
                debug!("Scanned {} ({})", path.display(), digest);
                let record = FileRecord::new(path.clone(), digest.clone(), Utc::now());
                if let Err(e) = store.upsert(record) {
                    error!("Aborting scan: {}", e);
                    return Err(e);
                }
                summary.written += 1;
                entries.push(ScanEntry {
                    path,
                    outcome: ScanOutcome::Written,
                    digest: Some(digest),
                    error: None,
                });
            }
            Err(e) => {
                warn!("{}", e);
                summary.errored += 1;
                entries.push(ScanEntry {
                    path,
                    outcome: ScanOutcome::Error,
                    digest: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if let Err(e) = store.commit() {
        error!("Scan results were not saved: {}", e);
        return Err(e);
    }

    info!(
        "Scan complete: {} written, {} errors, {} roots skipped",
        summary.written,
        summary.errored,
        discovery.root_errors.len()
    );

    Ok(ScanResult {
        algorithm: config.algorithm,
        started_at,
        finished_at: Utc::now(),
        entries,
        summary,
        root_errors: discovery.root_errors,
        walk_errors: discovery.walk_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{MemoryStore, Snapshot, StorageTarget};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> RunConfig {
        RunConfig::new(vec![root.to_path_buf()], StorageTarget::Csv(PathBuf::from("unused.csv")))
    }

    /// Store whose writes always fail
    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn load(&self, _path: &Path) -> Result<Option<FileRecord>> {
            Ok(None)
        }
        fn upsert(&mut self, _record: FileRecord) -> Result<()> {
            Err(Error::storage("broken", "disk full"))
        }
        fn load_all(&self) -> Result<Snapshot> {
            Ok(Snapshot::new())
        }
        fn describe(&self) -> String {
            "broken store".to_string()
        }
    }

    #[test]
    fn test_scan_writes_every_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "y").unwrap();

        let mut store = MemoryStore::new();
        let result = scan(&config_for(temp_dir.path()), &mut store, |_| {}).unwrap();

        assert_eq!(result.summary, ScanSummary { written: 2, errored: 0 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.commits(), 1);
        let names: Vec<_> = result
            .entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "y").unwrap();
        let config = config_for(temp_dir.path());

        let mut store = MemoryStore::new();
        scan(&config, &mut store, |_| {}).unwrap();
        let first: Vec<_> = store
            .load_all()
            .unwrap()
            .into_values()
            .map(|r| (r.path, r.checksum))
            .collect();

        scan(&config, &mut store, |_| {}).unwrap();
        let second: Vec<_> = store
            .load_all()
            .unwrap()
            .into_values()
            .map(|r| (r.path, r.checksum))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_root_reported_other_roots_scanned() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        let missing = temp_dir.path().join("gone");
        let config = RunConfig::new(
            vec![missing.clone(), temp_dir.path().to_path_buf()],
            StorageTarget::Csv(PathBuf::from("unused.csv")),
        );

        let mut store = MemoryStore::new();
        let result = scan(&config, &mut store, |_| {}).unwrap();
        assert_eq!(result.root_errors.len(), 1);
        assert_eq!(result.root_errors[0].root, missing);
        assert_eq!(result.summary.written, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_does_not_abort() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        let locked = temp_dir.path().join("b.txt");
        fs::write(&locked, "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            // Running as root, permissions are not enforced
            return;
        }

        let mut store = MemoryStore::new();
        let result = scan(&config_for(temp_dir.path()), &mut store, |_| {}).unwrap();
        assert_eq!(result.summary, ScanSummary { written: 1, errored: 1 });
        assert_eq!(result.entries[1].outcome, ScanOutcome::Error);
        assert!(result.entries[1].error.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_storage_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();

        let err = scan(&config_for(temp_dir.path()), &mut BrokenStore, |_| {}).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_progress_events() {
        use std::sync::Mutex;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        fs::write(temp_dir.path().join("b.txt"), "y").unwrap();

        let events = Mutex::new(Vec::new());
        let mut store = MemoryStore::new();
        scan(&config_for(temp_dir.path()), &mut store, |event| {
            events.lock().unwrap().push(event)
        })
        .unwrap();

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ScanProgressEvent::Started { total_files: 2 });
        assert_eq!(events[3], ScanProgressEvent::Finished { processed: 2 });
    }
}
