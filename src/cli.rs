use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::check;
use crate::config::{Defaults, FileConfig, RunConfig, ENV_CONFIG};
use crate::error::RootError;
use crate::logging;
use crate::output::{self, OutputMode};
use crate::progress::RunProgress;
use crate::scan;
use crate::store::{open_baseline, open_store};

/// Exit status when the run finished but some roots could not be scanned
const EXIT_ROOT_ERRORS: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "checkr")]
#[command(version)]
#[command(about = "Detect changed and corrupted files by comparing checksums against a baseline")]
#[command(long_about = "checkr records a checksum for every file under the given paths (scan) \
    and later reports which files are new, unchanged, modified or missing (check).\n\n\
    Examples:\n  \
    checkr scan -p ~/photos -r             # Record a baseline\n  \
    checkr check -p ~/photos -r            # Compare against it\n  \
    checkr check -p /srv --csvfile out.csv # Use a CSV baseline\n  \
    checkr check --json > report.json      # Machine-readable report")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except findings and errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Config file to read [default: ~/.checkr/config.yml]
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log file to write [default: ~/.checkr/checkr.log]
    #[arg(short = 'l', long = "log", value_name = "FILE", global = true)]
    pub log: Option<PathBuf>,
}

/// Options shared by every command that resolves a run
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Path to scan (repeatable) [default: current directory]
    #[arg(short = 'p', long = "path", value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Descend into subdirectories
    #[arg(short = 'r', long, conflicts_with = "no_recursive")]
    pub recursive: bool,

    /// Only look at files directly inside each path
    #[arg(short = 'R', long)]
    pub no_recursive: bool,

    /// Checksum algorithm: blake2b, md5 or blake3 [default: blake2b]
    #[arg(short = 'a', long, value_name = "NAME")]
    pub algorithm: Option<String>,

    /// Where the baseline is kept
    #[arg(long, value_name = "BACKEND", value_parser = ["database", "csv"])]
    pub backend: Option<String>,

    /// SQLite database holding the baseline
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// CSV file holding the baseline
    #[arg(long, value_name = "FILE")]
    pub csvfile: Option<PathBuf>,

    /// Checksum worker threads (0 = one per CPU)
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Output results as JSON for scripting
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn recursive(&self) -> Option<bool> {
        if self.recursive {
            Some(true)
        } else if self.no_recursive {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a fresh baseline for every file under the given paths
    #[command(visible_alias = "s")]
    Scan {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Compare files against the baseline and report differences
    #[command(visible_alias = "c")]
    Check {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the effective configuration
    Config {
        #[command(flatten)]
        run: RunArgs,
    },
}

impl Commands {
    fn run_args(&self) -> &RunArgs {
        match self {
            Commands::Scan { run } | Commands::Check { run } | Commands::Config { run } => run,
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// The command-line layer of the configuration.
    pub fn layer(&self) -> FileConfig {
        let run = self.command.run_args();
        FileConfig {
            paths: (!run.paths.is_empty()).then(|| run.paths.clone()),
            recursive: run.recursive(),
            algorithm: run.algorithm.clone(),
            backend: run.backend.clone(),
            usedb: None,
            database: run.database.clone(),
            csvfile: run.csvfile.clone(),
            verbose: (self.verbose > 0).then_some(self.verbose),
            logfile: self.log.clone(),
            workers: run.workers,
        }
    }

    /// Config file to read: `-c`, then `$CHECKR_CONFIG`, then the default.
    fn config_path(&self, defaults: &Defaults) -> PathBuf {
        self.config
            .clone()
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from))
            .map(|p| defaults.expand(&p))
            .unwrap_or_else(|| defaults.config_file())
    }

    /// Merge every configuration layer and resolve the run settings.
    pub fn resolve(&self, defaults: &Defaults) -> anyhow::Result<(RunConfig, PathBuf)> {
        let config_path = self.config_path(defaults);
        let file_layer = FileConfig::load(&config_path)?.unwrap_or_default();
        let layers = self.layer().or(FileConfig::from_env()).or(file_layer);
        let config = RunConfig::resolve(layers, defaults)?;
        Ok((config, config_path))
    }

    pub fn run(self) -> anyhow::Result<ExitCode> {
        let defaults = Defaults::detect()?;
        let (config, config_path) = self.resolve(&defaults)?;

        // Keeps the file writer alive until the run is over
        let _log_guard = match logging::init(config.verbosity, self.quiet, &config.log_file) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("warning: file logging disabled: {}", e);
                None
            }
        };
        tracing::debug!("Resolved configuration: {:?}", config);

        let output_mode = OutputMode::from_flags(config.verbosity, self.quiet);
        let json = self.command.run_args().json;
        let show_progress = !json && output_mode != OutputMode::Quiet;

        match self.command {
            Commands::Scan { .. } => {
                let mut store = open_store(&config.storage)
                    .with_context(|| format!("failed to open {}", config.storage))?;
                let progress = RunProgress::new("Scanning", show_progress);
                let result = scan::scan(&config, &mut *store, |event| progress.handle(event))?;
                drop(progress);

                if json {
                    output::print_json(&result)?;
                } else {
                    output::print_scan_human(&result, output_mode);
                }
                Ok(exit_code(&result.root_errors))
            }
            Commands::Check { .. } => {
                let store = open_baseline(&config.storage)
                    .with_context(|| format!("failed to open {}", config.storage))?;
                let progress = RunProgress::new("Checking", show_progress);
                let report = check::check(&config, &*store, |event| progress.handle(event))?;
                drop(progress);

                if json {
                    output::print_json(&report)?;
                } else {
                    output::print_check_human(&report, output_mode);
                }
                Ok(exit_code(&report.root_errors))
            }
            Commands::Config { .. } => {
                if json {
                    output::print_json(&config)?;
                } else {
                    print!(
                        "{}",
                        serde_yaml::to_string(&config).context("failed to render configuration")?
                    );
                    println!("# config file: {}", config_path.display());
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn exit_status(root_errors: &[RootError]) -> u8 {
    if root_errors.is_empty() {
        0
    } else {
        EXIT_ROOT_ERRORS
    }
}

fn exit_code(root_errors: &[RootError]) -> ExitCode {
    ExitCode::from(exit_status(root_errors))
}
