//! Error types for gitaware-backup

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using gitaware-backup's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while scanning, filtering and archiving a source tree.
///
/// Only fatal variants ever escape [`crate::Backup::run`]. Pattern-file and
/// per-file errors are reported to the observer as warnings and the backup
/// carries on without them.
#[derive(Error, Debug)]
pub enum Error {
    /// Source directory does not exist
    #[error("Source directory '{path}' does not exist")]
    SourceNotFound { path: PathBuf },

    /// Source path could not be resolved for a reason other than absence
    #[error("Cannot access source directory '{}': {source}", path.display())]
    SourceAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Source path exists but is not a directory
    #[error("Source path '{path}' is not a directory")]
    SourceNotDirectory { path: PathBuf },

    /// A user-supplied exclusion pattern failed to compile
    #[error("Invalid exclusion pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// An ignore-pattern file could not be read
    #[error("Failed to read ignore file {}: {source}", path.display())]
    PatternFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A single source file could not be checksummed or archived
    #[error("Failed to back up {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output archive could not be created, written or closed
    #[error("Archive error for {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source root itself could not be traversed
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// The operation was cancelled before it completed
    #[error("Backup interrupted")]
    Interrupted,
}

impl Error {
    /// Create a source not found error
    pub fn source_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SourceNotFound { path: path.into() }
    }

    /// Create a source access error
    pub fn source_access(path: &Path, source: io::Error) -> Self {
        Self::SourceAccess {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a source not directory error
    pub fn source_not_directory(path: impl Into<PathBuf>) -> Self {
        Self::SourceNotDirectory { path: path.into() }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a pattern file error
    pub fn pattern_file(path: &Path, source: io::Error) -> Self {
        Self::PatternFile {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a per-file error
    pub fn file(path: &Path, source: io::Error) -> Self {
        Self::File {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create an archive error
    pub fn archive(path: &Path, source: io::Error) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if the error must abort the backup.
    ///
    /// Pattern-file and per-file errors degrade gracefully; everything else
    /// triggers cleanup of the partial archive.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PatternFile { .. } | Self::File { .. })
    }

    /// Returns true if the error was caused by cancellation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns true for errors raised before any file was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceAccess { .. }
                | Self::SourceNotDirectory { .. }
                | Self::InvalidPattern { .. }
                | Self::InvalidConfig { .. }
        )
    }
}
