//! Comparison of the file system against a stored baseline
//!
//! Every path found on disk gets exactly one of new / unchanged / modified /
//! error, and every baseline path not seen on disk is reported missing,
//! unless it lies under a directory that could not be read, in which case
//! it is an error.
//! "Modified" only means the digest differs: an intentional edit and silent
//! corruption look the same to a checksum, and telling them apart is left
//! to whoever reads the report.

use crate::checksum::{self, Algorithm};
use crate::config::RunConfig;
use crate::enumerator;
use crate::error::{Result, RootError};
use crate::scan_events::ScanProgressEvent;
use crate::store::{FileRecord, RecordStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of comparing one path against the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// On disk, not in the baseline
    New,
    /// Digest matches the baseline
    Unchanged,
    /// Digest differs from the baseline (changed or corrupted)
    Modified,
    /// In the baseline, not found on disk
    Missing,
    /// Could not be read during this check
    Error,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::New,
        Classification::Unchanged,
        Classification::Modified,
        Classification::Missing,
        Classification::Error,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Unchanged => "unchanged",
            Classification::Modified => "modified",
            Classification::Missing => "missing",
            Classification::Error => "error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a path seen on disk.
pub fn classify(stored: Option<&FileRecord>, fresh: &Result<String>) -> Classification {
    match (stored, fresh) {
        (_, Err(_)) => Classification::Error,
        (None, Ok(_)) => Classification::New,
        (Some(record), Ok(digest)) if record.checksum == *digest => Classification::Unchanged,
        (Some(_), Ok(_)) => Classification::Modified,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckEntry {
    #[serde(serialize_with = "crate::store::serialize_path")]
    pub path: PathBuf,
    pub classification: Classification,
    /// Digest from the baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Digest computed during this check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub new: usize,
    pub unchanged: usize,
    pub modified: usize,
    pub missing: usize,
    pub error: usize,
}

impl CheckSummary {
    fn add(&mut self, classification: Classification) {
        *self.slot(classification) += 1;
    }

    fn slot(&mut self, classification: Classification) -> &mut usize {
        match classification {
            Classification::New => &mut self.new,
            Classification::Unchanged => &mut self.unchanged,
            Classification::Modified => &mut self.modified,
            Classification::Missing => &mut self.missing,
            Classification::Error => &mut self.error,
        }
    }

    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::New => self.new,
            Classification::Unchanged => self.unchanged,
            Classification::Modified => self.modified,
            Classification::Missing => self.missing,
            Classification::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.new + self.unchanged + self.modified + self.missing + self.error
    }

    /// True when every path matched the baseline
    pub fn is_clean(&self) -> bool {
        self.total() == self.unchanged
    }
}

/// Findings of a check run: disk paths in enumeration order, then missing
/// paths in path order
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub algorithm: Algorithm,
    pub checked_at: DateTime<Utc>,
    pub entries: Vec<CheckEntry>,
    pub summary: CheckSummary,
    pub root_errors: Vec<RootError>,
    /// Directories below a root that could not be read
    pub walk_errors: Vec<RootError>,
}

impl CheckReport {
    pub fn entries_with(&self, classification: Classification) -> impl Iterator<Item = &CheckEntry> {
        self.entries
            .iter()
            .filter(move |e| e.classification == classification)
    }

    pub fn classification_of(&self, path: &Path) -> Option<Classification> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.classification)
    }
}

/// Compare the files under the configured roots against the stored baseline.
///
/// The baseline is read once, up front, and never written.
pub fn check<F>(config: &RunConfig, store: &dyn RecordStore, on_progress: F) -> Result<CheckReport>
where
    F: Fn(ScanProgressEvent) + Sync,
{
    let checked_at = Utc::now();
    let mut snapshot = store.load_all()?;
    let discovery = enumerator::discover(&config.roots, config.recursive);
    info!(
        "Checking {} files against {} ({} baseline records)",
        discovery.files.len(),
        store.describe(),
        snapshot.len()
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
    let mut summary = CheckSummary::default();
    let mut length_mismatches = 0usize;
    let seen: HashSet<&PathBuf> = discovery.files.iter().collect();

    for (path, fresh) in discovery.files.iter().zip(digests) {
        let stored = snapshot.get(path);
        let classification = classify(stored, &fresh);

        match classification {
            Classification::Unchanged => debug!("File ({}) passed the check", path.display()),
            Classification::New => info!("No baseline for {}", path.display()),
            Classification::Modified => warn!("File ({}) FAILED the check", path.display()),
            Classification::Missing | Classification::Error => {}
        }

        if let (Some(record), Ok(digest)) = (stored, &fresh) {
            if record.checksum.len() != digest.len() {
                length_mismatches += 1;
            }
        }

        let error = match &fresh {
            Err(e) => {
                warn!("{}", e);
                Some(e.to_string())
            }
            Ok(_) => None,
        };

        summary.add(classification);
        entries.push(CheckEntry {
            path: path.clone(),
            classification,
            expected: stored.map(|r| r.checksum.clone()),
            actual: fresh.ok(),
            error,
        });
    }

    if length_mismatches > 0 {
        warn!(
            "{} baseline digests have a different length than {} digests; the baseline was probably made with another algorithm",
            length_mismatches, config.algorithm
        );
    }

    snapshot.retain(|path, _| !seen.contains(path));
    for (path, record) in snapshot {
        let (classification, error) = match discovery.unreadable_parent(&path) {
            Some(walk_error) => {
                warn!("File ({}) could not be reached: {}", path.display(), walk_error);
                (Classification::Error, Some(walk_error.to_string()))
            }
            None => {
                warn!("File ({}) is missing", path.display());
                (Classification::Missing, None)
            }
        };
        summary.add(classification);
        entries.push(CheckEntry {
            path,
            classification,
            expected: Some(record.checksum),
            actual: None,
            error,
        });
    }

    info!(
        "Check complete: {} files failed out of {} total files checked",
        summary.modified + summary.missing + summary.error,
        summary.total()
    );

    Ok(CheckReport {
        algorithm: config.algorithm,
        checked_at,
        entries,
        summary,
        root_errors: discovery.root_errors,
        walk_errors: discovery.walk_errors,
    })
}
