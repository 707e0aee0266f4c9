//! Streaming content checksums for manifest entries.

use crate::config::CancellationToken;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Name of the digest algorithm recorded in manifests.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Bytes read from disk per hashing step.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Computes hex-encoded SHA-256 digests without loading whole files.
#[derive(Debug)]
pub struct ChecksumComputer {
    buffer: Vec<u8>,
    cancel: CancellationToken,
}

impl ChecksumComputer {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Uses a read buffer of `chunk_size` bytes (at least one).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            buffer: vec![0; chunk_size.max(1)],
            cancel: CancellationToken::new(),
        }
    }

    /// Stops hashing between chunks once `cancel` is tripped.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Digests the file at `path`.
    ///
    /// Fails if the file cannot be opened or becomes unreadable mid-read.
    pub fn digest_file(&mut self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        self.digest_reader(file)
    }

    /// Digests everything `reader` yields.
    ///
    /// A cancelled token fails the digest with an [`io::ErrorKind::Other`] error.
    pub fn digest_reader<R: Read>(&mut self, mut reader: R) -> io::Result<String> {
        let mut hasher = Sha256::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(io::Error::other("checksum interrupted"));
            }
            let n = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&self.buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl Default for ChecksumComputer {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex-encoded SHA-256 digest of an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
