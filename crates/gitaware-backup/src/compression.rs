//! Compression modes for backup archives.
//!
//! The archive container is always tar; the mode selects how the tar stream is
//! compressed on its way to disk. Each mode produces the same `Write` sink so
//! the archive writer does not care which one is active.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::str::FromStr;

/// Default gzip level (6 = balanced speed/ratio).
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default zstd level.
pub const DEFAULT_ZSTD_LEVEL: u32 = 3;

/// Highest zstd level accepted without enabling long-distance "ultra" mode.
pub const MAX_ZSTD_LEVEL: u32 = 19;

/// Compression applied to the tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Plain, uncompressed tar
    None,
    /// DEFLATE via gzip framing
    #[default]
    Gzip,
    /// Zstandard
    Zstd,
}

impl CompressionMode {
    /// All supported modes.
    pub const ALL: [CompressionMode; 3] = [Self::None, Self::Gzip, Self::Zstd];

    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// File extension for an archive written in this mode, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "tar.gz",
            Self::Zstd => "tar.zst",
        }
    }

    /// Level used when the caller does not pick one.
    pub const fn default_level(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Gzip => DEFAULT_GZIP_LEVEL,
            Self::Zstd => DEFAULT_ZSTD_LEVEL,
        }
    }

    /// Clamps `level` into the range this mode accepts.
    pub fn clamp_level(self, level: u32) -> u32 {
        match self {
            Self::None => 0,
            Self::Gzip => level.clamp(1, 9),
            Self::Zstd => level.clamp(1, MAX_ZSTD_LEVEL),
        }
    }

    /// Resolves an optional requested level to the effective one.
    pub fn effective_level(self, requested: Option<u32>) -> u32 {
        requested
            .map(|level| self.clamp_level(level))
            .unwrap_or_else(|| self.default_level())
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMode {
    type Err = CompressionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "tar" | "store" => Ok(Self::None),
            "gzip" | "gz" | "deflate" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            _ => Err(CompressionModeParseError {
                input: s.to_string(),
            }),
        }
    }
}

/// Error returned when parsing an unsupported compression mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported compression '{input}' (expected one of: none, gzip, zstd)")]
pub struct CompressionModeParseError {
    input: String,
}

impl CompressionModeParseError {
    /// The rejected input.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// Compressing sink sitting between the tar builder and the output file.
pub(crate) enum ArchiveEncoder {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl ArchiveEncoder {
    /// Wraps `file` in the encoder for `mode`.
    pub(crate) fn new(file: File, mode: CompressionMode, level: u32) -> io::Result<Self> {
        let sink = BufWriter::new(file);
        Ok(match mode {
            CompressionMode::None => Self::Plain(sink),
            CompressionMode::Gzip => Self::Gzip(GzEncoder::new(sink, Compression::new(level))),
            CompressionMode::Zstd => {
                Self::Zstd(zstd::stream::write::Encoder::new(sink, level as i32)?)
            }
        })
    }

    /// Writes the compressor trailer, flushes buffers and syncs the file.
    pub(crate) fn finish(self) -> io::Result<File> {
        let sink = match self {
            Self::Plain(sink) => sink,
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
        };
        let file = sink.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file)
    }
}

impl Write for ArchiveEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}
