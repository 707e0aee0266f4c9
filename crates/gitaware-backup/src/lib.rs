//! Gitaware Backup Engine
//!
//! This crate snapshots a directory tree into a single compressed tar archive
//! while honoring the tree's ignore files. It is the library behind the
//! `gitaware` command line tool.
//!
//! # Features
//!
//! - **Ignore-aware**: `.gitignore` files are discovered per directory and
//!   applied to the paths below them; `.git` directories are always pruned
//! - **Streaming archives**: files are streamed straight into tar, optionally
//!   compressed with gzip or zstd
//! - **Checksum manifest**: optional SHA-256 manifest stored in the archive
//! - **Best effort**: unreadable files and ignore files are reported and
//!   skipped; only archive failures abort the run
//! - **All or nothing output**: a failed or interrupted run leaves no archive
//!   behind
//! - **Observable**: progress, warnings and the summary go to an injected
//!   [`BackupObserver`]
//!
//! # Examples
//!
//! ```no_run
//! use gitaware_backup::{create_backup, BackupConfig, CompressionMode, TracingObserver};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BackupConfig::new()
//!         .with_compression(CompressionMode::Gzip)
//!         .with_manifest(true);
//!
//!     let report = create_backup("/home/me/project", config, &TracingObserver)?;
//!
//!     println!(
//!         "Backup created: {} ({} files)",
//!         report.archive_path.display(),
//!         report.processed
//!     );
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backup;
pub mod checksum;
pub mod compression;
pub mod config;
pub mod error;
pub mod filters;
pub mod manifest;
pub mod progress;
pub mod scanner;

// Re-export commonly used types
pub use archive::{AddedFile, ArchiveWriter};
pub use backup::{
    create_backup, human_bytes, Backup, BackupReport, BackupState, ProgressCounters,
};
pub use checksum::{digest_bytes, ChecksumComputer, CHECKSUM_ALGORITHM};
pub use compression::{CompressionMode, CompressionModeParseError};
pub use config::{BackupConfig, CancellationToken, DEFAULT_PROGRESS_INTERVAL};
pub use error::{Error, Result};
pub use filters::{ExclusionSet, IgnoreRules, RuleSet, DEFAULT_IGNORE_FILE, GIT_DIR_NAME};
pub use manifest::{
    decode_path, encode_path, Manifest, ManifestEntry, ManifestParseError, MANIFEST_FILENAME,
};
pub use progress::{BackupObserver, NoOpObserver, ProgressBarObserver, TracingObserver};
pub use scanner::{ScanSummary, TreeScanner};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
