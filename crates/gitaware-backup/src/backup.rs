//! Backup orchestration.
//!
//! [`Backup`] sequences one run: scan the source tree, re-walk it applying the
//! discovered ignore rules, stream admitted files into the archive, append the
//! manifest and close the archive. Every fatal error moves the run to
//! [`BackupState::Failed`] and removes the partially written archive before
//! the error is returned.

use crate::archive::ArchiveWriter;
use crate::checksum::ChecksumComputer;
use crate::compression::CompressionMode;
use crate::config::{BackupConfig, CancellationToken};
use crate::error::{Error, Result};
use crate::filters::{ExclusionSet, IgnoreRules, RuleSet};
use crate::manifest::{encode_path, Manifest, ManifestEntry, MANIFEST_FILENAME};
use crate::progress::BackupObserver;
use crate::scanner::{walk_warning, ScanSummary, TreeScanner};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Top-level archive entry used when the source has no file name (`/`).
pub const FALLBACK_ARCHIVE_ROOT: &str = "backup";

/// Lifecycle of one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupState {
    Init,
    Scanning,
    Writing,
    Finalizing,
    Done,
    Failed,
}

impl BackupState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: BackupState) -> bool {
        use BackupState::*;
        matches!(
            (self, next),
            (Init, Scanning)
                | (Scanning, Writing)
                | (Writing, Finalizing)
                | (Finalizing, Done)
                | (Init | Scanning | Writing | Finalizing, Failed)
        )
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Scanning => "scanning",
            Self::Writing => "writing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Candidate and processed counts, used for progress reporting only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    /// Files found by the scan pass, before exclusion
    pub total: u64,

    /// Files written to the archive so far
    pub processed: u64,
}

impl ProgressCounters {
    pub fn new(total: u64) -> Self {
        Self { total, processed: 0 }
    }

    /// Records one archived file. Returns true when a progress event is due.
    pub fn record(&mut self, interval: u64) -> bool {
        self.processed += 1;
        self.processed % interval.max(1) == 0
    }

    /// Completion percentage, capped at 100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.processed.min(self.total) * 100 / self.total) as u8
    }
}

/// Summary of a completed backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Absolute path of the archive
    pub archive_path: PathBuf,

    /// Compression applied to the archive
    pub compression: CompressionMode,

    /// Final archive size on disk
    pub size_bytes: u64,

    /// Total size of the archived file contents
    pub input_bytes: u64,

    /// Files found by the scan pass, before exclusion
    pub candidates: u64,

    /// Files written to the archive
    pub processed: u64,

    /// Files that could not be checksummed or archived
    pub failed: u64,

    /// Paths excluded by ignore rules or `.git` pruning
    pub excluded: u64,

    /// Symlinks stored as link entries
    pub symlinks: u64,

    /// Manifest lines written, when manifest mode was on
    pub manifest_entries: Option<usize>,

    /// Wall-clock time of the whole run
    pub duration: Duration,
}

impl BackupReport {
    /// Candidates that did not end up in the archive, excluded or failed.
    pub fn skipped(&self) -> u64 {
        self.candidates.saturating_sub(self.processed)
    }

    /// Returns a human-readable archive size.
    pub fn human_readable_size(&self) -> String {
        human_bytes(self.size_bytes)
    }

    /// Space saved by compression as a percentage of the input size.
    pub fn compression_percentage(&self) -> u8 {
        if self.input_bytes == 0 || self.size_bytes >= self.input_bytes {
            return 0;
        }
        let ratio = self.size_bytes as f64 / self.input_bytes as f64;
        ((1.0 - ratio) * 100.0) as u8
    }
}

/// Formats bytes as a human-readable string.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// One backup of one source tree.
///
/// Construction validates everything that can be checked without touching
/// the filesystem for writing: the source must be an existing directory, the
/// configuration must be valid and extra exclusion patterns must compile.
/// [`Backup::run`] can be called once.
///
/// # Example
///
/// ```no_run
/// use gitaware_backup::{Backup, BackupConfig, CompressionMode, TracingObserver};
///
/// let config = BackupConfig::new()
///     .with_compression(CompressionMode::Zstd)
///     .with_manifest(true);
/// let mut backup = Backup::new("/home/me/project", config)?;
/// let report = backup.run(&TracingObserver)?;
/// println!("wrote {}", report.archive_path.display());
/// # Ok::<(), gitaware_backup::Error>(())
/// ```
pub struct Backup {
    source: PathBuf,
    archive_root: PathBuf,
    output: PathBuf,
    config: BackupConfig,
    extra_rules: Option<RuleSet>,
    cancel: CancellationToken,
    state: BackupState,
}

impl Backup {
    pub fn new(source: impl AsRef<Path>, config: BackupConfig) -> Result<Self> {
        let requested = source.as_ref();
        config.validate()?;

        let source = fs::canonicalize(requested).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::source_not_found(requested),
            _ => Error::source_access(requested, e),
        })?;
        if !source.is_dir() {
            return Err(Error::source_not_directory(requested));
        }

        let extra_rules = if config.extra_excludes.is_empty() {
            None
        } else {
            Some(RuleSet::from_patterns(&source, &config.extra_excludes)?)
        };

        let output = resolve_output(
            &source,
            config.output.as_deref(),
            config.compression,
            Local::now(),
        )?;

        Ok(Self {
            archive_root: archive_root(&source),
            source,
            output,
            config,
            extra_rules,
            cancel: CancellationToken::new(),
            state: BackupState::Init,
        })
    }

    /// Uses `cancel` to stop the run from another thread.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Canonical source directory.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Absolute archive path the run writes to.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Top-level directory name inside the archive.
    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    /// Runs the backup to completion.
    ///
    /// Recoverable problems are passed to `observer` as warnings. On a fatal
    /// error or cancellation the partial archive is removed and the original
    /// error is returned.
    pub fn run(&mut self, observer: &dyn BackupObserver) -> Result<BackupReport> {
        if self.state != BackupState::Init {
            return Err(Error::invalid_config(format!(
                "backup already ran (state: {})",
                self.state
            )));
        }

        let started = Instant::now();
        let mut partial = PartialOutput::new(&self.output);

        match self.execute(observer, &mut partial, started) {
            Ok(report) => {
                partial.disarm();
                self.transition(BackupState::Done, observer);
                observer.on_complete(&report);
                Ok(report)
            }
            Err(e) => {
                self.transition(BackupState::Failed, observer);
                partial.cleanup();
                observer.on_failed(&e);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: BackupState, observer: &dyn BackupObserver) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        observer.on_state(next);
    }

    fn execute(
        &mut self,
        observer: &dyn BackupObserver,
        partial: &mut PartialOutput,
        started: Instant,
    ) -> Result<BackupReport> {
        self.transition(BackupState::Scanning, observer);
        let ScanSummary {
            candidates,
            rules,
            mut excluded,
            ..
        } = TreeScanner::new(&self.source)
            .with_ignore_filenames(self.config.ignore_filenames.clone())
            .with_progress_interval(self.config.progress_interval)
            .scan(observer, &self.cancel)?;

        let rules = match self.extra_rules.clone() {
            Some(extra) => rules.with_global(extra),
            None => rules,
        };
        observer.on_scan_complete(candidates, rules.len());

        self.transition(BackupState::Writing, observer);
        let mut writer = ArchiveWriter::open(
            &self.output,
            self.config.compression,
            self.config.effective_level(),
        )?
        .with_cancellation(self.cancel.clone());
        partial.arm();

        let mut manifest = self.config.manifest.then(|| Manifest::new(&self.source));
        let mut tally = WriteTally {
            counters: ProgressCounters::new(candidates),
            ..WriteTally::default()
        };
        self.write_tree(
            &mut writer,
            &rules,
            &mut excluded,
            manifest.as_mut(),
            &mut tally,
            observer,
        )?;
        observer.on_progress(tally.counters.processed, tally.counters.total);

        self.transition(BackupState::Finalizing, observer);
        let manifest_entries = match manifest {
            Some(manifest) => {
                writer.add_bytes(MANIFEST_FILENAME, manifest.render().as_bytes())?;
                Some(manifest.len())
            }
            None => None,
        };
        self.cancel.check()?;
        let size_bytes = writer.finish()?;

        Ok(BackupReport {
            archive_path: self.output.clone(),
            compression: self.config.compression,
            size_bytes,
            input_bytes: tally.input_bytes,
            candidates,
            processed: tally.counters.processed,
            failed: tally.failed,
            excluded: excluded.len() as u64,
            symlinks: tally.symlinks,
            manifest_entries,
            duration: started.elapsed(),
        })
    }

    fn write_tree(
        &self,
        writer: &mut ArchiveWriter,
        rules: &IgnoreRules,
        excluded: &mut ExclusionSet,
        mut manifest: Option<&mut Manifest>,
        tally: &mut WriteTally,
        observer: &dyn BackupObserver,
    ) -> Result<()> {
        let mut checksums = ChecksumComputer::new().with_cancellation(self.cancel.clone());
        let mut walker = WalkDir::new(&self.source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            self.cancel.check()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(Error::Walk(e)),
                Err(e) => {
                    observer.on_warning(&walk_warning(e));
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type();
            let is_dir = file_type.is_dir();

            if excluded.covers(path) || rules.is_excluded(path, is_dir) {
                excluded.insert(path);
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            if is_dir {
                continue;
            }
            if path == self.output {
                tracing::debug!(path = %path.display(), "skipping the archive being written");
                continue;
            }

            let name = match path.strip_prefix(&self.source) {
                Ok(rel) => self.archive_root.join(rel),
                Err(_) => continue,
            };

            if file_type.is_symlink() {
                match writer.add_symlink(path, &name) {
                    Ok(()) => tally.symlinks += 1,
                    Err(e) if !e.is_fatal() => {
                        tally.failed += 1;
                        observer.on_warning(&e);
                    }
                    Err(e) => return Err(e),
                }
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!(path = %path.display(), "skipping special file");
                continue;
            }

            let digest = if manifest.is_some() {
                match checksums.digest_file(path) {
                    Ok(digest) => Some(digest),
                    Err(e) => {
                        self.cancel.check()?;
                        tally.failed += 1;
                        observer.on_warning(&Error::file(path, e));
                        continue;
                    }
                }
            } else {
                None
            };

            match writer.add_file(path, &name) {
                Ok(added) => {
                    tally.input_bytes += added.size_bytes;
                    if let (Some(manifest), Some(digest)) = (manifest.as_deref_mut(), digest) {
                        manifest.push(ManifestEntry::new(
                            encode_path(&name),
                            added.size_bytes,
                            added.modified,
                            digest,
                        ));
                    }
                    if tally.counters.record(self.config.progress_interval) {
                        observer.on_progress(tally.counters.processed, tally.counters.total);
                    }
                }
                Err(e) if !e.is_fatal() => {
                    tally.failed += 1;
                    observer.on_warning(&e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("source", &self.source)
            .field("output", &self.output)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Backs up `source` with `config`, reporting to `observer`.
///
/// Convenience wrapper around [`Backup::new`] and [`Backup::run`] for callers
/// that never cancel. The report's `archive_path` is absolute.
pub fn create_backup(
    source: impl AsRef<Path>,
    config: BackupConfig,
    observer: &dyn BackupObserver,
) -> Result<BackupReport> {
    Backup::new(source, config)?.run(observer)
}

#[derive(Debug, Default)]
struct WriteTally {
    counters: ProgressCounters,
    failed: u64,
    symlinks: u64,
    input_bytes: u64,
}

/// Removes the output file unless disarmed.
///
/// Armed only once the archive was created, so a file that could not be
/// opened for writing is never deleted.
struct PartialOutput {
    path: PathBuf,
    armed: bool,
}

impl PartialOutput {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: false,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn cleanup(&mut self) {
        if !std::mem::take(&mut self.armed) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed partial archive"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove partial archive"
            ),
        }
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Name of the top-level archive directory for `source`.
pub fn archive_root(source: &Path) -> PathBuf {
    source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_ARCHIVE_ROOT))
}

/// Default archive file name: `<source name>_<YYYYmmdd_HHMMSS>.<extension>`.
pub fn default_archive_name(
    source: &Path,
    mode: CompressionMode,
    now: DateTime<Local>,
) -> String {
    format!(
        "{}_{}.{}",
        archive_root(source).to_string_lossy(),
        now.format("%Y%m%d_%H%M%S"),
        mode.extension()
    )
}

/// Resolves the absolute archive path.
///
/// No output, or an existing directory, gets the default name; anything else
/// is used as given. The parent directory is canonicalized when it exists so
/// the path compares equal to what the walk sees inside the source tree.
fn resolve_output(
    source: &Path,
    requested: Option<&Path>,
    mode: CompressionMode,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let path = match requested {
        None => PathBuf::from(default_archive_name(source, mode, now)),
        Some(dir) if dir.is_dir() => dir.join(default_archive_name(source, mode, now)),
        Some(file) => file.to_path_buf(),
    };

    let absolute = std::path::absolute(&path).map_err(|e| Error::archive(&path, e))?;
    let resolved = match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    };
    Ok(resolved)
}
