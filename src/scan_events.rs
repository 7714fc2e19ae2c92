//! Progress events emitted by the scan and check runs (used by the CLI progress bar)

use std::path::PathBuf;

/// Real-time progress updates during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanProgressEvent {
    /// Enumeration has finished and hashing is about to start.
    Started {
        total_files: u64,
    },

    /// One file has been hashed (successfully or not).
    FileDone {
        path: PathBuf,
    },

    /// All files are hashed; results are being recorded or compared.
    Finished {
        processed: u64,
    },
}
