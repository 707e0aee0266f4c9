//! Progress and event reporting for backup operations.
//!
//! The backup never logs user-facing events on its own. It reports state
//! changes, progress, warnings and the final summary to an injected
//! [`BackupObserver`]; callers decide whether that becomes log lines, a
//! progress bar, both, or nothing.

use crate::backup::{BackupReport, BackupState};
use crate::error::Error;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Observer trait for backup events.
///
/// Every method has a no-op default so implementations only override what
/// they care about.
///
/// # Example
///
/// ```rust
/// use gitaware_backup::{BackupObserver, Error};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct WarningCounter(AtomicU64);
///
/// impl BackupObserver for WarningCounter {
///     fn on_warning(&self, _warning: &Error) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait BackupObserver: Send + Sync {
    /// Called after every state transition
    fn on_state(&self, state: BackupState) {
        let _ = state;
    }

    /// Called periodically while the scan pass counts files
    fn on_scan_progress(&self, files_seen: u64) {
        let _ = files_seen;
    }

    /// Called once the scan pass is over
    ///
    /// # Arguments
    ///
    /// * `candidates` - Files found, before exclusion (progress denominator)
    /// * `rule_sets` - Directories that carried an ignore file
    fn on_scan_complete(&self, candidates: u64, rule_sets: usize) {
        let _ = (candidates, rule_sets);
    }

    /// Called at fixed intervals during the write pass and once at its end
    fn on_progress(&self, processed: u64, total: u64) {
        let _ = (processed, total);
    }

    /// Called for every recovered error: unreadable ignore files, files that
    /// could not be checksummed or archived, unreadable subdirectories
    fn on_warning(&self, warning: &Error) {
        let _ = warning;
    }

    /// Called once after the archive was closed successfully
    fn on_complete(&self, report: &BackupReport) {
        let _ = report;
    }

    /// Called once after a fatal error, after the partial archive was removed
    fn on_failed(&self, error: &Error) {
        let _ = error;
    }
}

/// A no-op observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl BackupObserver for NoOpObserver {}

/// An observer that reports backup events through `tracing`
///
/// # Log Levels
///
/// - state changes: DEBUG
/// - scan and write progress: INFO
/// - warnings: WARN
/// - summary: INFO
/// - failure: ERROR (WARN for interrupts)
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BackupObserver for TracingObserver {
    fn on_state(&self, state: BackupState) {
        tracing::debug!(state = %state, "backup state");
    }

    fn on_scan_complete(&self, candidates: u64, rule_sets: usize) {
        tracing::info!(
            candidates = candidates,
            rule_sets = rule_sets,
            "scan complete"
        );
    }

    fn on_progress(&self, processed: u64, total: u64) {
        let percent = if total > 0 {
            processed.min(total) * 100 / total
        } else {
            100
        };
        tracing::info!(
            processed = processed,
            total = total,
            "processed {} of {} files ({}%)",
            processed,
            total,
            percent
        );
    }

    fn on_warning(&self, warning: &Error) {
        tracing::warn!("{}", warning);
    }

    fn on_complete(&self, report: &BackupReport) {
        tracing::info!(
            archive = %report.archive_path.display(),
            duration_secs = report.duration.as_secs_f64(),
            size = %report.human_readable_size(),
            processed = report.processed,
            skipped = report.skipped(),
            failed = report.failed,
            "backup completed"
        );
    }

    fn on_failed(&self, error: &Error) {
        if error.is_interrupted() {
            tracing::warn!("backup interrupted, partial archive removed");
        } else {
            tracing::error!(error = %error, "backup failed");
        }
    }
}

/// Terminal progress bars: a spinner while scanning and a bounded bar while
/// writing.
#[derive(Debug, Clone)]
pub struct ProgressBarObserver {
    scan_bar: ProgressBar,
    archive_bar: ProgressBar,
}

impl ProgressBarObserver {
    /// Creates bars that draw to stderr.
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), ProgressDrawTarget::stderr())
    }

    /// Creates bars that never draw; used when output is not a terminal.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), ProgressDrawTarget::hidden())
    }

    fn with_target(scan: ProgressDrawTarget, archive: ProgressDrawTarget) -> Self {
        let scan_bar = ProgressBar::with_draw_target(None, scan);
        scan_bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let archive_bar = ProgressBar::with_draw_target(Some(0), archive);
        archive_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        Self {
            scan_bar,
            archive_bar,
        }
    }

    /// Current write-pass position, for tests and callers that poll.
    pub fn position(&self) -> u64 {
        self.archive_bar.position()
    }

    /// Current write-pass length.
    pub fn length(&self) -> Option<u64> {
        self.archive_bar.length()
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupObserver for ProgressBarObserver {
    fn on_state(&self, state: BackupState) {
        match state {
            BackupState::Scanning => {
                self.scan_bar.set_message("Scanning files...");
                self.scan_bar.enable_steady_tick(Duration::from_millis(100));
            }
            BackupState::Writing => {
                self.archive_bar.set_message("Creating archive...");
            }
            BackupState::Finalizing => {
                self.archive_bar.set_message("Finalizing...");
            }
            _ => {}
        }
    }

    fn on_scan_progress(&self, files_seen: u64) {
        self.scan_bar.set_message(format!("Found {} files...", files_seen));
    }

    fn on_scan_complete(&self, candidates: u64, _rule_sets: usize) {
        self.scan_bar.finish_with_message(format!("Found {} files", candidates));
        self.archive_bar.set_length(candidates);
    }

    fn on_progress(&self, processed: u64, total: u64) {
        if self.archive_bar.length() != Some(total) {
            self.archive_bar.set_length(total);
        }
        self.archive_bar.set_position(processed);
    }

    fn on_complete(&self, report: &BackupReport) {
        self.archive_bar
            .finish_with_message(format!("Added {} files to archive", report.processed));
    }

    fn on_failed(&self, _error: &Error) {
        self.scan_bar.abandon();
        self.archive_bar.abandon();
    }
}

impl<A: BackupObserver, B: BackupObserver> BackupObserver for (A, B) {
    fn on_state(&self, state: BackupState) {
        self.0.on_state(state);
        self.1.on_state(state);
    }

    fn on_scan_progress(&self, files_seen: u64) {
        self.0.on_scan_progress(files_seen);
        self.1.on_scan_progress(files_seen);
    }

    fn on_scan_complete(&self, candidates: u64, rule_sets: usize) {
        self.0.on_scan_complete(candidates, rule_sets);
        self.1.on_scan_complete(candidates, rule_sets);
    }

    fn on_progress(&self, processed: u64, total: u64) {
        self.0.on_progress(processed, total);
        self.1.on_progress(processed, total);
    }

    fn on_warning(&self, warning: &Error) {
        self.0.on_warning(warning);
        self.1.on_warning(warning);
    }

    fn on_complete(&self, report: &BackupReport) {
        self.0.on_complete(report);
        self.1.on_complete(report);
    }

    fn on_failed(&self, error: &Error) {
        self.0.on_failed(error);
        self.1.on_failed(error);
    }
}

impl<T: BackupObserver + ?Sized> BackupObserver for &T {
    fn on_state(&self, state: BackupState) {
        (**self).on_state(state);
    }

    fn on_scan_progress(&self, files_seen: u64) {
        (**self).on_scan_progress(files_seen);
    }

    fn on_scan_complete(&self, candidates: u64, rule_sets: usize) {
        (**self).on_scan_complete(candidates, rule_sets);
    }

    fn on_progress(&self, processed: u64, total: u64) {
        (**self).on_progress(processed, total);
    }

    fn on_warning(&self, warning: &Error) {
        (**self).on_warning(warning);
    }

    fn on_complete(&self, report: &BackupReport) {
        (**self).on_complete(report);
    }

    fn on_failed(&self, error: &Error) {
        (**self).on_failed(error);
    }
}
