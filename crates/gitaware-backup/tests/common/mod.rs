//! Common test utilities for gitaware-backup
//!
//! Scratch source trees, an observer that records events, and helpers that
//! read finished archives back.

#![allow(dead_code)]

use gitaware_backup::{BackupObserver, BackupState, CancellationToken, CompressionMode, Error};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// A scratch directory holding one source tree named `project`.
pub struct TestTree {
    pub dir: TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join("project")).expect("Failed to create source dir");
        Self { dir }
    }

    /// Source root.
    pub fn source(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    /// A path next to (not inside) the source tree.
    pub fn outside(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `content` to `rel` inside the source, creating parents.
    pub fn file(&self, rel: &str, content: &str) -> &Self {
        let path = self.source().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write file");
        self
    }
}

/// Archive contents keyed by entry name. Symlinks map to their target.
pub fn read_archive(path: &Path, mode: CompressionMode) -> BTreeMap<String, Vec<u8>> {
    let raw = fs::read(path).expect("Failed to read archive");
    let reader: Box<dyn Read> = match mode {
        CompressionMode::None => Box::new(raw.as_slice()),
        CompressionMode::Gzip => Box::new(flate2::read::GzDecoder::new(raw.as_slice())),
        CompressionMode::Zstd => Box::new(
            zstd::stream::read::Decoder::new(raw.as_slice()).expect("Failed to open zstd stream"),
        ),
    };

    let mut archive = tar::Archive::new(reader);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().expect("Failed to list entries") {
        let mut entry = entry.expect("Corrupt entry");
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut data = Vec::new();
        if entry.header().entry_type().is_symlink() {
            let target = entry.link_name().unwrap().unwrap();
            data.extend_from_slice(target.to_string_lossy().as_bytes());
        } else {
            entry.read_to_end(&mut data).expect("Failed to read entry");
        }
        entries.insert(name, data);
    }
    entries
}

/// Entry names of an archive, manifest included.
pub fn entry_names(path: &Path, mode: CompressionMode) -> Vec<String> {
    read_archive(path, mode).into_keys().collect()
}

/// Observer that records what it is told.
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<BackupState>>,
    pub warnings: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<(u64, u64)>>,
    pub failures: Mutex<Vec<String>>,
    cancel_on_progress: Option<CancellationToken>,
    remove_on_progress: Mutex<Option<PathBuf>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips `cancel` on the first write-pass progress event.
    pub fn cancelling(cancel: CancellationToken) -> Self {
        Self {
            cancel_on_progress: Some(cancel),
            ..Self::default()
        }
    }

    /// Deletes `path` on the first write-pass progress event.
    pub fn removing(path: PathBuf) -> Self {
        Self {
            remove_on_progress: Mutex::new(Some(path)),
            ..Self::default()
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<BackupState> {
        self.states.lock().unwrap().clone()
    }
}

impl BackupObserver for RecordingObserver {
    fn on_state(&self, state: BackupState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_progress(&self, processed: u64, total: u64) {
        self.progress.lock().unwrap().push((processed, total));
        if let Some(cancel) = &self.cancel_on_progress {
            cancel.cancel();
        }
        if let Some(path) = self.remove_on_progress.lock().unwrap().take() {
            fs::remove_file(path).expect("Failed to remove file");
        }
    }

    fn on_warning(&self, warning: &Error) {
        self.warnings.lock().unwrap().push(warning.to_string());
    }

    fn on_failed(&self, error: &Error) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}
