//! Source-tree scan pass.
//!
//! Walks the tree once, top-down, to collect ignore files and count candidate
//! files before anything is written. `.git` directories are pruned as soon as
//! they are seen, so ignore files inside them are never read.

use crate::config::CancellationToken;
use crate::error::{Error, Result};
use crate::filters::{
    is_git_dir_name, load_dir_rules, ExclusionSet, IgnoreRules, DEFAULT_IGNORE_FILE,
};
use crate::progress::BackupObserver;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of a scan pass.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    /// Regular files seen outside `.git` directories, before ignore rules apply.
    /// Only a progress denominator, never the number of files archived.
    pub candidates: u64,

    /// Directories visited, root included
    pub directories: u64,

    /// Symlinks seen (not followed)
    pub symlinks: u64,

    /// Rule sets discovered, keyed by the directory holding the ignore file
    pub rules: IgnoreRules,

    /// `.git` directories pruned during the scan
    pub excluded: ExclusionSet,
}

/// Single-pass scanner for a source tree.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    root: PathBuf,
    ignore_filenames: Vec<String>,
    progress_interval: u64,
}

impl TreeScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore_filenames: vec![DEFAULT_IGNORE_FILE.to_string()],
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Ignore-file names to look for in every directory.
    pub fn with_ignore_filenames(mut self, names: Vec<String>) -> Self {
        self.ignore_filenames = names;
        self
    }

    /// Files counted between two scan progress events.
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the tree and returns the counts and rule sets found.
    ///
    /// Unreadable ignore files and subdirectories are reported to `observer`
    /// and skipped. Only an unreadable root, or cancellation, fails the scan.
    pub fn scan(
        &self,
        observer: &dyn BackupObserver,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary {
            candidates: 0,
            directories: 0,
            symlinks: 0,
            rules: IgnoreRules::new(&self.root),
            excluded: ExclusionSet::new(),
        };

        let mut walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            cancel.check()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(Error::Walk(e)),
                Err(e) => {
                    observer.on_warning(&walk_warning(e));
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if entry.depth() > 0 && is_git_dir_name(entry.file_name()) {
                    tracing::trace!(path = %entry.path().display(), "pruning git directory");
                    summary.excluded.insert(entry.path());
                    walker.skip_current_dir();
                    continue;
                }

                summary.directories += 1;
                self.register_rules(entry.path(), &mut summary.rules, observer);
            } else if file_type.is_file() {
                summary.candidates += 1;
                if summary.candidates % self.progress_interval == 0 {
                    observer.on_scan_progress(summary.candidates);
                }
            } else if file_type.is_symlink() {
                summary.symlinks += 1;
            }
        }

        tracing::debug!(
            candidates = summary.candidates,
            directories = summary.directories,
            rule_sets = summary.rules.len(),
            "scan finished"
        );
        Ok(summary)
    }

    fn register_rules(&self, dir: &Path, rules: &mut IgnoreRules, observer: &dyn BackupObserver) {
        match load_dir_rules(dir, &self.ignore_filenames) {
            Ok(Some(compiled)) => {
                for rejected in &compiled.rejected {
                    let path = rejected.file.as_deref().unwrap_or(dir);
                    observer.on_warning(&Error::pattern_file(
                        path,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "line {}: '{}' skipped: {}",
                                rejected.line_number, rejected.line, rejected.message
                            ),
                        ),
                    ));
                }
                tracing::trace!(
                    dir = %dir.display(),
                    patterns = compiled.rules.len(),
                    "registered ignore rules"
                );
                rules.insert(compiled.rules);
            }
            Ok(None) => {}
            Err(e) => observer.on_warning(&e),
        }
    }
}

/// Converts a non-root walk failure into a per-path warning.
pub(crate) fn walk_warning(e: walkdir::Error) -> Error {
    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
    Error::File {
        path,
        source: io::Error::from(e),
    }
}
