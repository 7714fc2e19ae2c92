//! Error types for checkr
//!
//! Four kinds of failure matter to a run:
//! - configuration problems, reported before any file I/O
//! - a root path that cannot be walked (fatal for that root only)
//! - a single file that cannot be read (recorded as an error outcome)
//! - a storage backend that cannot be opened or written (fatal for the run)

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A root directory that could not be enumerated.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("cannot scan '{}': {reason}", .root.display())]
pub struct RootError {
    #[serde(serialize_with = "crate::store::serialize_path")]
    pub root: PathBuf,
    pub reason: String,
}

impl RootError {
    pub fn new(root: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Path(#[from] RootError),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage error ({target}): {message}")]
    Storage { target: String, message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn storage(target: impl Into<String>, message: impl ToString) -> Self {
        Error::Storage {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error makes the results of a run untrustworthy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Storage { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::storage("sqlite", err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::storage("csv", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(Error::config("bad algorithm").is_fatal());
        assert!(Error::storage("db", "disk full").is_fatal());
        assert!(!Error::from(RootError::new("/nope", "does not exist")).is_fatal());
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::io("/secret", io).is_fatal());
    }

    #[test]
    fn test_root_error_message() {
        let err = RootError::new("/data/photos", "not a directory");
        assert_eq!(err.to_string(), "cannot scan '/data/photos': not a directory");
    }
}
