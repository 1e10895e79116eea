//! Result aggregation and terminal progress.

use crate::worker::{FileDescriptor, FormatResult, Mode};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::Write;
use std::time::Duration;

/// Totals folded from every batch result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub reformatted: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn add(&mut self, result: &FormatResult) {
        self.total += result.total;
        self.reformatted += result.formatted.len();
        self.failed += result.failed.len();
    }

    /// Process exit code for this run.
    ///
    /// Failed files always fail the run; in check mode so does any file that
    /// would be reformatted.
    pub fn exit_code(&self, check: bool) -> i32 {
        if self.failed > 0 || (check && self.reformatted > 0) {
            1
        } else {
            0
        }
    }

    /// One-line description of the run.
    pub fn message(&self, mode: Mode) -> String {
        match mode {
            Mode::Assert => format!("Checked {} files", self.total),
            Mode::Write | Mode::Print => {
                format!("Reformatted {} / {} files...", self.reformatted, self.total)
            }
        }
    }
}

/// Spinner on stderr plus the list of changed files on `out`.
pub struct ProgressReporter<W: Write> {
    mode: Mode,
    summary: RunSummary,
    spinner: ProgressBar,
    out: W,
    failed: Vec<FileDescriptor>,
}

impl<W: Write> ProgressReporter<W> {
    /// `quiet` hides the spinner; changed files are still listed.
    pub fn new(mode: Mode, quiet: bool, out: W) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        let reporter = Self {
            mode,
            summary: RunSummary::default(),
            spinner,
            out,
            failed: Vec::new(),
        };
        reporter.spinner.set_message(reporter.summary.message(mode));
        reporter
    }

    fn listing(&self) -> bool {
        self.mode != Mode::Print
    }

    /// Fold one batch result and report its files.
    pub fn record(&mut self, result: &FormatResult) {
        self.summary.add(result);
        self.failed.extend(result.failed.iter().cloned());

        if self.listing() {
            for file in &result.formatted {
                let path = file.display_path().display().to_string();
                self.spinner.suspend(|| writeln!(self.out, "{}", path).ok());
            }
        }
        self.spinner.set_message(self.summary.message(self.mode));
    }

    /// Stop the spinner and print failed files. Returns the final summary.
    pub fn finish(mut self) -> RunSummary {
        let summary = self.summary;
        if self.mode == Mode::Assert && summary.reformatted > 0 {
            self.spinner.set_style(
                ProgressStyle::with_template("{prefix:.red.bold} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            self.spinner.set_prefix("✖");
            self.spinner.abandon_with_message(format!(
                "{} files were not formatted",
                summary.reformatted
            ));
        } else {
            self.spinner
                .finish_with_message(summary.message(self.mode));
        }

        for file in &self.failed {
            eprintln!(
                "{} {}",
                "failed:".if_supports_color(Stderr, |text| text.red()),
                file.display_path()
                    .display()
                    .if_supports_color(Stderr, |text| text.red())
            );
        }
        self.out.flush().ok();
        summary
    }
}
