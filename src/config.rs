//! Layered configuration
//!
//! Every source (command line, environment, YAML config file) produces a
//! [`FileConfig`] with only the keys it sets. Layers are merged with the
//! highest-precedence layer first and then resolved, once, into an
//! immutable [`RunConfig`] that the scan and check runs receive.

use crate::checksum::Algorithm;
use crate::error::{Error, Result};
use crate::store::StorageTarget;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Environment variable naming the SQLite database
pub const ENV_DATABASE: &str = "CHECKR_DATABASE";
/// Environment variable naming the config file
pub const ENV_CONFIG: &str = "CHECKR_CONFIG";

const CONFIG_FILE_NAME: &str = "config.yml";
const DATABASE_FILE_NAME: &str = "checkr.sqlite";
const LOG_FILE_NAME: &str = "checkr.log";
const MAX_VERBOSITY: u8 = 2;

/// One configuration layer. Unset keys fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub paths: Option<Vec<PathBuf>>,
    pub recursive: Option<bool>,
    pub algorithm: Option<String>,
    /// `database` or `csv`
    pub backend: Option<String>,
    /// Older spelling of `backend`: true selects the database
    pub usedb: Option<bool>,
    pub database: Option<PathBuf>,
    pub csvfile: Option<PathBuf>,
    pub verbose: Option<u8>,
    pub logfile: Option<PathBuf>,
    pub workers: Option<usize>,
}

impl FileConfig {
    /// Read a YAML config file. A file that does not exist yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::config(format!(
                    "failed to read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Settings taken from the environment.
    pub fn from_env() -> Self {
        Self::from_env_vars(|key| std::env::var(key).ok())
    }

    pub fn from_env_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database: lookup(ENV_DATABASE)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Fill keys unset in `self` from `lower`.
    pub fn or(self, lower: FileConfig) -> FileConfig {
        FileConfig {
            paths: self.paths.or(lower.paths),
            recursive: self.recursive.or(lower.recursive),
            algorithm: self.algorithm.or(lower.algorithm),
            backend: self.backend.or(lower.backend),
            usedb: self.usedb.or(lower.usedb),
            database: self.database.or(lower.database),
            csvfile: self.csvfile.or(lower.csvfile),
            verbose: self.verbose.or(lower.verbose),
            logfile: self.logfile.or(lower.logfile),
            workers: self.workers.or(lower.workers),
        }
    }
}

/// Fallback locations used when no layer sets a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// The user's home directory, used for `~` expansion
    pub home: PathBuf,
    /// Directory scanned when no paths are configured
    pub cwd: PathBuf,
}

impl Defaults {
    pub fn detect() -> Result<Self> {
        let home = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| Error::config("could not determine the home directory"))?;
        let cwd = std::env::current_dir()
            .map_err(|e| Error::config(format!("could not determine the current directory: {}", e)))?;
        Ok(Self { home, cwd })
    }

    /// `~/.checkr`
    pub fn app_dir(&self) -> PathBuf {
        self.home.join(".checkr")
    }

    pub fn config_file(&self) -> PathBuf {
        self.app_dir().join(CONFIG_FILE_NAME)
    }

    /// Expand a leading `~` to the home directory.
    pub fn expand(&self, path: &Path) -> PathBuf {
        let mut components = path.components();
        match components.next() {
            Some(Component::Normal(first)) if first == "~" => self.home.join(components.as_path()),
            _ => path.to_path_buf(),
        }
    }
}

/// Fully resolved settings for one scan or check run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    pub algorithm: Algorithm,
    pub storage: StorageTarget,
    pub verbosity: u8,
    pub log_file: PathBuf,
    /// Checksum worker threads; 0 means one per CPU
    pub workers: usize,
}

impl RunConfig {
    /// Settings for `roots` with every other option at its default.
    pub fn new(roots: Vec<PathBuf>, storage: StorageTarget) -> Self {
        Self {
            roots,
            recursive: false,
            algorithm: Algorithm::default(),
            storage,
            verbosity: 0,
            log_file: PathBuf::from(LOG_FILE_NAME),
            workers: 0,
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Resolve merged layers into run settings.
    ///
    /// Every configuration problem is reported here, before any file I/O.
    pub fn resolve(layers: FileConfig, defaults: &Defaults) -> Result<Self> {
        let storage = resolve_storage(&layers, defaults)?;

        let roots: Vec<PathBuf> = layers
            .paths
            .unwrap_or_else(|| vec![defaults.cwd.clone()])
            .iter()
            .map(|p| defaults.expand(p))
            .collect();
        if roots.is_empty() {
            return Err(Error::config("no paths to scan were given"));
        }

        let algorithm = match layers.algorithm.as_deref() {
            Some(name) => name.parse()?,
            None => Algorithm::default(),
        };

        Ok(Self {
            roots,
            recursive: layers.recursive.unwrap_or(false),
            algorithm,
            storage,
            verbosity: layers.verbose.unwrap_or(0).min(MAX_VERBOSITY),
            log_file: layers
                .logfile
                .map(|p| defaults.expand(&p))
                .unwrap_or_else(|| defaults.app_dir().join(LOG_FILE_NAME)),
            workers: layers.workers.unwrap_or(0),
        })
    }
}

fn resolve_storage(layers: &FileConfig, defaults: &Defaults) -> Result<StorageTarget> {
    let use_csv = match layers.backend.as_deref().map(|b| b.trim().to_ascii_lowercase()) {
        Some(b) if b == "csv" => true,
        Some(b) if b == "database" || b == "db" => false,
        Some(other) => {
            return Err(Error::config(format!(
                "unknown storage backend '{}' (expected 'database' or 'csv')",
                other
            )))
        }
        None => match layers.usedb {
            Some(usedb) => !usedb,
            None => layers.csvfile.is_some(),
        },
    };

    if use_csv {
        let csvfile = layers
            .csvfile
            .as_ref()
            .ok_or_else(|| Error::config("the CSV backend needs a csvfile to be set"))?;
        Ok(StorageTarget::Csv(defaults.expand(csvfile)))
    } else {
        let database = layers
            .database
            .as_ref()
            .map(|p| defaults.expand(p))
            .unwrap_or_else(|| defaults.app_dir().join(DATABASE_FILE_NAME));
        Ok(StorageTarget::Database(database))
    }
}
