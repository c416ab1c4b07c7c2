//! Progress and history observers
//!
//! Long-running operations report through a [`ProgressSink`]; commit history
//! changes (after clone, pull or clear) are pushed to a [`HistorySink`]. Both
//! are registered once per mirror handle.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::sync::CommitRecord;

/// One progress report: `value` is a fraction in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub value: f64,
    pub description: String,
}

impl Progress {
    pub fn new(value: f64, description: impl Into<String>) -> Self {
        Progress {
            value: value.clamp(0.0, 1.0),
            description: description.into(),
        }
    }

    /// Fraction for a counter; no work at all counts as done.
    pub fn fraction(cur: usize, total: usize) -> f64 {
        if total == 0 {
            1.0
        } else {
            (cur as f64 / total as f64).min(1.0)
        }
    }

    /// Progress for a `cur` out of `total` counter
    pub fn counted(cur: usize, total: usize, description: impl Into<String>) -> Self {
        Progress::new(Self::fraction(cur, total), description)
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

pub trait HistorySink: Send + Sync {
    fn on_history(&self, commits: &[CommitRecord]);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        self(progress)
    }
}

impl<F> HistorySink for F
where
    F: Fn(&[CommitRecord]) + Send + Sync,
{
    fn on_history(&self, commits: &[CommitRecord]) {
        self(commits)
    }
}

/// Sink that drops everything
pub struct Silent;

impl ProgressSink for Silent {
    fn on_progress(&self, _progress: Progress) {}
}

impl HistorySink for Silent {
    fn on_history(&self, _commits: &[CommitRecord]) {}
}

const BAR_RESOLUTION: u64 = 1000;

/// Renders progress events on a terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Result<Self> {
        let bar = ProgressBar::new(BAR_RESOLUTION);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  [{bar:40.cyan/blue}] {percent:>3}% {msg}")?
                .progress_chars("█▓░"),
        );
        Ok(BarProgress { bar })
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, progress: Progress) {
        self.bar
            .set_position((progress.value * BAR_RESOLUTION as f64).round() as u64);
        self.bar.set_message(progress.description);
    }
}
