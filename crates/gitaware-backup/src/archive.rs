//! Archive writing for backups.
//!
//! [`ArchiveWriter`] owns the output file for the lifetime of one backup. It
//! appends file entries streamed straight from disk, in-memory entries such as
//! the manifest, and symlinks, then closes the stream exactly once.

use crate::compression::{ArchiveEncoder, CompressionMode};
use crate::config::CancellationToken;
use crate::error::{Error, Result};
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Builder as TarBuilder, EntryType, Header, HeaderMode};

/// Outcome of appending one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedFile {
    /// Size recorded in the entry header
    pub size_bytes: u64,

    /// Modification time recorded in the entry header
    pub modified: SystemTime,
}

/// Write-only, append-only tar stream tied to one output path.
pub struct ArchiveWriter {
    path: PathBuf,
    mode: CompressionMode,
    builder: TarBuilder<ArchiveEncoder>,
    entries: usize,
    cancel: CancellationToken,
}

impl ArchiveWriter {
    /// Creates (or truncates) `path` and starts a tar stream compressed with `mode`.
    pub fn open(path: &Path, mode: CompressionMode, level: u32) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::archive(path, e))?;
        let encoder = ArchiveEncoder::new(file, mode, mode.clamp_level(level))
            .map_err(|e| Error::archive(path, e))?;

        let mut builder = TarBuilder::new(encoder);
        builder.mode(HeaderMode::Complete);
        builder.follow_symlinks(false);

        tracing::debug!(path = %path.display(), compression = %mode, "opened archive");
        Ok(Self {
            path: path.to_path_buf(),
            mode,
            builder,
            entries: 0,
            cancel: CancellationToken::new(),
        })
    }

    /// Aborts the file being streamed once `cancel` is tripped.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Output path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Streams the file at `source` into the archive as `name`.
    ///
    /// Opening or reading the source fails with [`Error::File`], which callers
    /// treat as a skipped file. If the file shrinks or stops being readable
    /// after its header was written, the entry is zero-filled to its declared
    /// size so the archive stays well-formed, and [`Error::File`] is still
    /// returned with a message saying the entry was zero-filled. Failures
    /// writing the archive itself are [`Error::Archive`]. Cancellation while
    /// streaming fails with [`Error::Interrupted`] and leaves the archive
    /// unusable.
    pub fn add_file(&mut self, source: &Path, name: impl AsRef<Path>) -> Result<AddedFile> {
        let file = File::open(source).map_err(|e| Error::file(source, e))?;
        let metadata = file.metadata().map_err(|e| Error::file(source, e))?;
        if !metadata.is_file() {
            return Err(Error::file(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let mut header = file_header(&metadata);
        let size = metadata.len();
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let mut reader = ExactLengthReader::new(file, size, self.cancel.clone());

        if let Err(e) = self.builder.append_data(&mut header, name, &mut reader) {
            return Err(if self.cancel.is_cancelled() {
                Error::Interrupted
            } else {
                Error::archive(&self.path, e)
            });
        }
        self.entries += 1;

        match reader.into_fault() {
            None => Ok(AddedFile {
                size_bytes: size,
                modified,
            }),
            Some(fault) => Err(Error::file(source, zero_filled(fault, size))),
        }
    }

    /// Appends `content` as a regular file entry named `name`.
    pub fn add_bytes(&mut self, name: impl AsRef<Path>, content: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(unix_now());

        self.builder
            .append_data(&mut header, name, content)
            .map_err(|e| Error::archive(&self.path, e))?;
        self.entries += 1;
        Ok(())
    }

    /// Stores the symlink at `source` as a link entry named `name`.
    pub fn add_symlink(&mut self, source: &Path, name: impl AsRef<Path>) -> Result<()> {
        let target = std::fs::read_link(source).map_err(|e| Error::file(source, e))?;
        let metadata = std::fs::symlink_metadata(source).map_err(|e| Error::file(source, e))?;

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);

        self.builder
            .append_link(&mut header, name, &target)
            .map_err(|e| Error::archive(&self.path, e))?;
        self.entries += 1;
        Ok(())
    }

    /// Writes the tar trailer, finishes compression and syncs the file.
    ///
    /// Returns the final archive size in bytes.
    pub fn finish(self) -> Result<u64> {
        let path = self.path;
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| Error::archive(&path, e))?;
        let file = encoder.finish().map_err(|e| Error::archive(&path, e))?;
        let size = file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::archive(&path, e))?;

        tracing::debug!(path = %path.display(), size_bytes = size, "closed archive");
        Ok(size)
    }
}

fn file_header(metadata: &Metadata) -> Header {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header.set_entry_type(EntryType::Regular);
    header.set_size(metadata.len());
    header
}

/// Extends a read fault with the fact that its entry was padded with zeros.
fn zero_filled(fault: io::Error, size: u64) -> io::Error {
    io::Error::new(fault.kind(), format!("{fault}; archive entry zero-filled to {size} bytes"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Yields exactly `len` bytes: source bytes first, then zeros if the source
/// ends early or fails. The first failure is kept for the caller.
///
/// Cancellation is the one hard error. It is not [`io::ErrorKind::Interrupted`]
/// because `io::copy` retries that kind.
struct ExactLengthReader<R> {
    inner: R,
    remaining: u64,
    fault: Option<io::Error>,
    cancel: CancellationToken,
}

impl<R: Read> ExactLengthReader<R> {
    fn new(inner: R, len: u64, cancel: CancellationToken) -> Self {
        Self {
            inner,
            remaining: len,
            fault: None,
            cancel,
        }
    }

    fn into_fault(self) -> Option<io::Error> {
        self.fault
    }

    fn pad(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining as usize);
        buf[..n].fill(0);
        n
    }
}

impl<R: Read> Read for ExactLengthReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("backup interrupted"));
        }

        let n = if self.fault.is_some() {
            self.pad(buf)
        } else {
            let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
            match self.inner.read(&mut buf[..max]) {
                Ok(0) => {
                    self.fault = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file shrank while reading ({} bytes missing)", self.remaining),
                    ));
                    self.pad(buf)
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
                Err(e) => {
                    self.fault = Some(e);
                    self.pad(buf)
                }
            }
        };

        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn read_entries(path: &Path, mode: CompressionMode) -> BTreeMap<String, Vec<u8>> {
        let raw = fs::read(path).unwrap();
        let reader: Box<dyn Read> = match mode {
            CompressionMode::None => Box::new(raw.as_slice()),
            CompressionMode::Gzip => Box::new(flate2::read::GzDecoder::new(raw.as_slice())),
            CompressionMode::Zstd => {
                Box::new(zstd::stream::read::Decoder::new(raw.as_slice()).unwrap())
            }
        };

        let mut archive = tar::Archive::new(reader);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(name, data);
        }
        out
    }

    #[test]
    fn test_add_file_and_bytes_in_every_mode() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("hello.txt");
        fs::write(&source, "hello world").unwrap();
        let mtime = fs::metadata(&source).unwrap().modified().unwrap();

        for mode in CompressionMode::ALL {
            let out = dir.path().join(format!("out.{}", mode.extension()));
            let mut writer = ArchiveWriter::open(&out, mode, mode.default_level()).unwrap();

            let added = writer.add_file(&source, "proj/hello.txt").unwrap();
            assert_eq!(added.size_bytes, 11);
            assert_eq!(added.modified, mtime);
            writer.add_bytes("backup_manifest.txt", b"manifest").unwrap();
            assert_eq!(writer.entries(), 2);

            let size = writer.finish().unwrap();
            assert_eq!(size, fs::metadata(&out).unwrap().len());

            let entries = read_entries(&out, mode);
            assert_eq!(entries["proj/hello.txt"], b"hello world");
            assert_eq!(entries["backup_manifest.txt"], b"manifest");
        }
    }

    #[test]
    fn test_long_entry_names() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("f");
        fs::write(&source, "x").unwrap();
        let name = format!("proj/{}/file.txt", "d".repeat(150));

        let out = dir.path().join("long.tar");
        let mut writer = ArchiveWriter::open(&out, CompressionMode::None, 0).unwrap();
        writer.add_file(&source, Path::new(&name)).unwrap();
        writer.finish().unwrap();

        let entries = read_entries(&out, CompressionMode::None);
        assert_eq!(entries[&name], b"x");
    }

    #[test]
    fn test_missing_source_is_per_file_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.tar.gz");
        let mut writer = ArchiveWriter::open(&out, CompressionMode::Gzip, 6).unwrap();

        let err = writer
            .add_file(&dir.path().join("vanished.txt"), "proj/vanished.txt")
            .unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert!(!err.is_fatal());
        assert_eq!(writer.entries(), 0);

        writer.finish().unwrap();
        assert!(read_entries(&out, CompressionMode::Gzip).is_empty());
    }

    #[test]
    fn test_open_in_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("no/such/dir/out.tar");

        let err = ArchiveWriter::open(&out, CompressionMode::None, 0)
            .err()
            .expect("open should fail");
        assert!(matches!(err, Error::Archive { .. }));
        assert!(err.is_fatal());
        assert!(!out.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_entry() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("target.txt"), "t").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink("target.txt", &link).unwrap();

        let out = dir.path().join("links.tar");
        let mut writer = ArchiveWriter::open(&out, CompressionMode::None, 0).unwrap();
        writer.add_symlink(&link, "proj/link.txt").unwrap();
        writer.finish().unwrap();

        let raw = fs::read(&out).unwrap();
        let mut archive = tar::Archive::new(raw.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), EntryType::Symlink);
        assert_eq!(entry.link_name().unwrap().unwrap().to_string_lossy(), "target.txt");
    }

    #[test]
    fn test_exact_length_reader_pads_short_source() {
        let mut reader = ExactLengthReader::new(&b"abc"[..], 6, CancellationToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"abc\0\0\0");
        let fault = reader.into_fault().unwrap();
        assert_eq!(fault.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_exact_length_reader_truncates_grown_source() {
        let mut reader = ExactLengthReader::new(&b"abcdef"[..], 4, CancellationToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"abcd");
        assert!(reader.into_fault().is_none());
    }

    #[test]
    fn test_exact_length_reader_pads_after_error() {
        struct FailAfter(usize);
        impl Read for FailAfter {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::other("stale handle"));
                }
                let n = self.0.min(buf.len());
                buf[..n].fill(b'x');
                self.0 -= n;
                Ok(n)
            }
        }

        let mut reader = ExactLengthReader::new(FailAfter(2), 5, CancellationToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"xx\0\0\0");
        assert_eq!(reader.into_fault().unwrap().to_string(), "stale handle");
    }

    #[test]
    fn test_zero_filled_fault_message() {
        let fault = io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while reading");
        let err = Error::file(Path::new("/src/big.bin"), zero_filled(fault, 4096));

        assert!(!err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("/src/big.bin"), "{message}");
        assert!(message.contains("entry zero-filled to 4096 bytes"), "{message}");
    }

    #[test]
    fn test_cancelled_add_file_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("large.bin");
        fs::write(&source, vec![7u8; 64 * 1024]).unwrap();

        let cancel = CancellationToken::new();
        let out = dir.path().join("out.tar");
        let mut writer = ArchiveWriter::open(&out, CompressionMode::None, 0)
            .unwrap()
            .with_cancellation(cancel.clone());
        writer.add_file(&source, "proj/first.bin").unwrap();

        cancel.cancel();
        let err = writer.add_file(&source, "proj/second.bin").unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(writer.entries(), 1);
    }

    #[test]
    fn test_exact_length_reader_stops_when_cancelled() {
        struct Endless(CancellationToken);
        impl Read for Endless {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.0.cancel();
                buf.fill(b'z');
                Ok(buf.len())
            }
        }

        let cancel = CancellationToken::new();
        let mut reader = ExactLengthReader::new(Endless(cancel.clone()), u64::MAX, cancel);
        let err = io::copy(&mut reader, &mut io::sink()).unwrap_err();

        assert_ne!(err.kind(), io::ErrorKind::Interrupted);
        assert!(reader.into_fault().is_none());
    }
}
