//! Backup configuration.

use crate::compression::CompressionMode;
use crate::error::{Error, Result};
use crate::filters::DEFAULT_IGNORE_FILE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Files processed between two progress events.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// Options for one backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Output archive path; derived from the source name and time when unset
    pub output: Option<PathBuf>,

    /// Compression applied to the tar stream
    pub compression: CompressionMode,

    /// Compression level; clamped to the mode's range, mode default when unset
    pub compression_level: Option<u32>,

    /// Whether to store a checksum manifest in the archive
    pub manifest: bool,

    /// Files processed between progress events
    pub progress_interval: u64,

    /// Ignore-file names honored in every directory
    pub ignore_filenames: Vec<String>,

    /// Extra gitignore-style patterns anchored at the source root
    pub extra_excludes: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output: None,
            compression: CompressionMode::default(),
            compression_level: None,
            manifest: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            ignore_filenames: vec![DEFAULT_IGNORE_FILE.to_string()],
            extra_excludes: Vec::new(),
        }
    }
}

impl BackupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output archive path.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Sets the compression mode.
    pub fn with_compression(mut self, compression: CompressionMode) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the compression level.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Enables or disables the checksum manifest.
    pub fn with_manifest(mut self, manifest: bool) -> Self {
        self.manifest = manifest;
        self
    }

    /// Sets how many files pass between progress events.
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Replaces the honored ignore-file names.
    pub fn with_ignore_filenames(mut self, names: Vec<String>) -> Self {
        self.ignore_filenames = names;
        self
    }

    /// Adds root-anchored exclusion patterns.
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.extra_excludes.extend(patterns);
        self
    }

    /// Effective compression level for the configured mode.
    pub fn effective_level(&self) -> u32 {
        self.compression.effective_level(self.compression_level)
    }

    /// Checks values that cannot be clamped into shape.
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval == 0 {
            return Err(Error::invalid_config("progress interval must be at least 1"));
        }
        for name in &self.ignore_filenames {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(Error::invalid_config(format!(
                    "ignore file name '{}' must be a plain file name",
                    name
                )));
            }
        }
        if let Some(output) = &self.output {
            if output.as_os_str().is_empty() {
                return Err(Error::invalid_config("output path is empty"));
            }
        }
        Ok(())
    }
}

/// Cooperative cancellation flag shared between a backup and its controller.
///
/// Clones observe the same flag. The backup checks it between files and while
/// reading file contents, and fails with [`Error::Interrupted`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns [`Error::Interrupted`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackupConfig::default();
        assert_eq!(config.compression, CompressionMode::Gzip);
        assert_eq!(config.effective_level(), 6);
        assert!(!config.manifest);
        assert_eq!(config.progress_interval, 100);
        assert_eq!(config.ignore_filenames, vec![".gitignore".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = BackupConfig::new()
            .with_output("/tmp/out.tar.zst")
            .with_compression(CompressionMode::Zstd)
            .with_compression_level(40)
            .with_manifest(true)
            .with_progress_interval(0)
            .with_excludes(vec!["*.bak".to_string()]);

        assert_eq!(config.output, Some(PathBuf::from("/tmp/out.tar.zst")));
        assert_eq!(config.effective_level(), 19);
        assert!(config.manifest);
        assert_eq!(config.progress_interval, 1);
        assert_eq!(config.extra_excludes, vec!["*.bak".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BackupConfig::default();
        config.progress_interval = 0;
        assert!(config.validate().is_err());

        let config = BackupConfig::default().with_ignore_filenames(vec!["a/b".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));

        let config = BackupConfig::default().with_output("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: BackupConfig =
            serde_json::from_str(r#"{"compression": "zstd", "manifest": true}"#).unwrap();

        assert_eq!(config.compression, CompressionMode::Zstd);
        assert!(config.manifest);
        assert_eq!(config.progress_interval, DEFAULT_PROGRESS_INTERVAL);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Interrupted)));
    }
}
