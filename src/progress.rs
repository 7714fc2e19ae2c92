//! Terminal progress for scan and check runs

use crate::scan_events::ScanProgressEvent;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Progress display driven by [`ScanProgressEvent`]s.
///
/// Starts as a spinner while files are being discovered and turns into a
/// bar once the total is known. A disabled display draws nothing.
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(verb: &str, enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(spinner_style());
        bar.set_message(format!("{}: discovering files...", verb));
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn handle(&self, event: ScanProgressEvent) {
        match event {
            ScanProgressEvent::Started { total_files } => {
                self.bar.disable_steady_tick();
                self.bar.set_style(bar_style());
                self.bar.set_length(total_files);
                self.bar.set_position(0);
                self.bar.set_message("");
            }
            ScanProgressEvent::FileDone { path } => {
                self.bar.inc(1);
                if let Some(name) = path.file_name() {
                    self.bar.set_message(name.to_string_lossy().into_owned());
                }
            }
            ScanProgressEvent::Finished { .. } => self.bar.finish_and_clear(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Drop for RunProgress {
    fn drop(&mut self) {
        // A run that failed part way never sends Finished
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
