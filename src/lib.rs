//! checkr library crate
//!
//! Records a checksum baseline for a set of directories and later compares
//! the file system against it. The CLI binary is a thin layer over this API.

pub mod check;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scan;
pub mod scan_events;
pub mod store;

pub use check::{check, CheckReport, Classification};
pub use checksum::Algorithm;
pub use config::RunConfig;
pub use error::{Error, Result, RootError};
pub use scan::{scan, ScanResult};
pub use store::{open_baseline, open_store, FileRecord, RecordStore, StorageTarget};
