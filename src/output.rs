use crate::check::{CheckEntry, CheckReport, Classification};
use crate::error::RootError;
use crate::scan::{ScanOutcome, ScanResult};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::fmt::Write;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,       // Findings only, no summary
    Normal,      // Findings and summary
    Verbose,     // Every path, including unchanged ones
    VeryVerbose, // Every path with its digests
}

impl OutputMode {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if verbose >= 2 {
            OutputMode::VeryVerbose
        } else if verbose == 1 {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }
}

const DIVIDER_WIDTH: usize = 60;

fn divider() -> ColoredString {
    "─".repeat(DIVIDER_WIDTH).dimmed()
}

fn tag(classification: Classification) -> ColoredString {
    let text = format!("{:<10}", classification.label().to_uppercase());
    match classification {
        Classification::New => text.cyan(),
        Classification::Unchanged => text.green(),
        Classification::Modified => text.yellow().bold(),
        Classification::Missing => text.red(),
        Classification::Error => text.red().bold(),
    }
}

fn write_root_errors(out: &mut String, root_errors: &[RootError], walk_errors: &[RootError]) {
    for err in root_errors {
        let _ = writeln!(out, "{} {}", "SKIPPED".yellow().bold(), err);
    }
    for err in walk_errors {
        let _ = writeln!(out, "{} {}", "UNREADABLE".yellow().bold(), err);
    }
}

fn write_check_entry(out: &mut String, entry: &CheckEntry, mode: OutputMode) {
    let _ = write!(out, "{} {}", tag(entry.classification), entry.path.display());
    if let Some(reason) = &entry.error {
        let _ = write!(out, " ({})", reason.dimmed());
    }
    out.push('\n');

    if mode == OutputMode::VeryVerbose {
        if let Some(expected) = &entry.expected {
            let _ = writeln!(out, "           expected {}", expected.dimmed());
        }
        if let Some(actual) = &entry.actual {
            let _ = writeln!(out, "           actual   {}", actual.dimmed());
        }
    }
}

/// Render a check report for the terminal.
pub fn format_check_human(report: &CheckReport, mode: OutputMode) -> String {
    let mut out = String::new();
    write_root_errors(&mut out, &report.root_errors, &report.walk_errors);

    let show_unchanged = matches!(mode, OutputMode::Verbose | OutputMode::VeryVerbose);
    for entry in &report.entries {
        if entry.classification == Classification::Unchanged && !show_unchanged {
            continue;
        }
        write_check_entry(&mut out, entry, mode);
    }

    if mode == OutputMode::Quiet {
        return out;
    }

    if !report.entries.is_empty() || !report.root_errors.is_empty() || !report.walk_errors.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "{}", divider());
    let _ = writeln!(
        out,
        "{} {} paths ({})",
        "Checked".bold(),
        report.summary.total(),
        report.algorithm
    );
    for classification in Classification::ALL {
        let _ = writeln!(
            out,
            "  {} {:>8}",
            tag(classification),
            report.summary.count(classification)
        );
    }
    let _ = writeln!(out, "{}", divider());
    if report.summary.is_clean() {
        let _ = writeln!(out, "{}", "All files match the baseline.".green());
    } else {
        let _ = writeln!(
            out,
            "{}",
            "Some files differ from the baseline.".yellow()
        );
    }
    out
}

/// Render a scan result for the terminal.
pub fn format_scan_human(result: &ScanResult, mode: OutputMode) -> String {
    let mut out = String::new();
    write_root_errors(&mut out, &result.root_errors, &result.walk_errors);

    for entry in &result.entries {
        match entry.outcome {
            ScanOutcome::Error => {
                let _ = writeln!(
                    out,
                    "{} {} ({})",
                    tag(Classification::Error),
                    entry.path.display(),
                    entry.error.as_deref().unwrap_or("unknown error").dimmed()
                );
            }
            ScanOutcome::Written => match mode {
                OutputMode::Verbose => {
                    let _ = writeln!(out, "{} {}", format!("{:<10}", "SCANNED").green(), entry.path.display());
                }
                OutputMode::VeryVerbose => {
                    let _ = writeln!(
                        out,
                        "{} {} {}",
                        format!("{:<10}", "SCANNED").green(),
                        entry.path.display(),
                        entry.digest.as_deref().unwrap_or_default().dimmed()
                    );
                }
                OutputMode::Quiet | OutputMode::Normal => {}
            },
        }
    }

    if mode == OutputMode::Quiet {
        return out;
    }

    let elapsed = result.finished_at - result.started_at;
    let _ = writeln!(out, "{}", divider());
    let _ = writeln!(
        out,
        "{} {} files with {} in {:.2}s",
        "Scanned".bold(),
        result.summary.written + result.summary.errored,
        result.algorithm,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    let _ = writeln!(out, "  {} {:>8}", format!("{:<10}", "recorded").green(), result.summary.written);
    let _ = writeln!(out, "  {} {:>8}", format!("{:<10}", "errors").red(), result.summary.errored);
    let _ = writeln!(out, "{}", divider());
    out
}

pub fn print_check_human(report: &CheckReport, mode: OutputMode) {
    print!("{}", format_check_human(report, mode));
}

pub fn print_scan_human(result: &ScanResult, mode: OutputMode) {
    print!("{}", format_scan_human(result, mode));
}

/// Print any run result as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
