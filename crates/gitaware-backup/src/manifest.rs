//! Backup manifest format.
//!
//! The manifest is stored as the last entry of an archive when manifest mode is
//! enabled. It is plain text: a `#`-prefixed header block followed by a column
//! header and one CSV line per archived file, in traversal order.
//!
//! ```text
//! # gitaware backup manifest
//! # created: 2026-10-19T08:30:00Z
//! # source: /home/me/project
//! # algorithm: sha256
//! path,size_bytes,modified,sha256
//! project/src/main.rs,1042,2026-10-18T21:04:11Z,9f86d081...
//! ```
//!
//! Paths are written with [`encode_path`]: a backslash is doubled and every
//! byte that is not valid UTF-8 is written as `\xNN`, so names that are not
//! Unicode still lead back to the live file through [`decode_path`].

use crate::checksum::CHECKSUM_ALGORITHM;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Name of the manifest entry at the archive root.
pub const MANIFEST_FILENAME: &str = "backup_manifest.txt";

/// Title line of the header block.
pub const MANIFEST_TITLE: &str = "gitaware backup manifest";

/// Column header line.
pub const MANIFEST_COLUMNS: &str = "path,size_bytes,modified,sha256";

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Archive-relative path with `/` separators, escaped by [`encode_path`]
    pub path: String,

    /// Size in bytes at the time it was read
    pub size_bytes: u64,

    /// Modification time, RFC 3339 in UTC
    pub modified: String,

    /// Hex-encoded content digest
    pub digest: String,
}

impl ManifestEntry {
    pub fn new(
        path: impl Into<String>,
        size_bytes: u64,
        modified: SystemTime,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            modified: format_timestamp(modified.into()),
            digest: digest.into(),
        }
    }

    /// The archive-relative path with escapes undone.
    ///
    /// Returns None when the stored path holds a malformed escape.
    pub fn relative_path(&self) -> Option<PathBuf> {
        decode_path(&self.path)
    }

    fn to_line(&self) -> String {
        format!(
            "{},{},{},{}",
            escape_field(&self.path),
            self.size_bytes,
            escape_field(&self.modified),
            escape_field(&self.digest)
        )
    }
}

/// Manifest accumulated during one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the backup started, RFC 3339 in UTC
    pub created_at: String,

    /// Absolute source directory
    pub source: PathBuf,

    /// Digest algorithm used for every entry
    pub algorithm: String,

    /// Entries in traversal order
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Creates an empty manifest stamped with the current time.
    pub fn new(source: &Path) -> Self {
        Self::with_created_at(source, Utc::now())
    }

    pub fn with_created_at(source: &Path, created_at: DateTime<Utc>) -> Self {
        Self {
            created_at: format_timestamp(created_at),
            source: source.to_path_buf(),
            algorithm: CHECKSUM_ALGORITHM.to_string(),
            entries: Vec::new(),
        }
    }

    /// Appends an entry. Entries are never reordered or deduplicated.
    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the manifest text stored in the archive.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", MANIFEST_TITLE);
        let _ = writeln!(out, "# created: {}", self.created_at);
        let _ = writeln!(out, "# source: {}", encode_os_str(self.source.as_os_str()));
        let _ = writeln!(out, "# algorithm: {}", self.algorithm);
        let _ = writeln!(out, "{}", MANIFEST_COLUMNS);
        for entry in &self.entries {
            let _ = writeln!(out, "{}", entry.to_line());
        }
        out
    }

    /// Parses manifest text produced by [`Manifest::render`].
    pub fn parse(text: &str) -> Result<Self, ManifestParseError> {
        let mut created_at = None;
        let mut source = None;
        let mut algorithm = None;
        let mut saw_columns = false;
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            if line.is_empty() {
                continue;
            }

            if !saw_columns {
                if let Some(header) = line.strip_prefix('#') {
                    let header = header.trim();
                    if let Some(v) = header.strip_prefix("created:") {
                        created_at = Some(v.trim().to_string());
                    } else if let Some(v) = header.strip_prefix("source:") {
                        let path = decode_path(v.trim()).ok_or_else(|| {
                            ManifestParseError::new(line_number, "invalid escape in source")
                        })?;
                        source = Some(path);
                    } else if let Some(v) = header.strip_prefix("algorithm:") {
                        algorithm = Some(v.trim().to_string());
                    }
                    continue;
                }
                if line == MANIFEST_COLUMNS {
                    saw_columns = true;
                    continue;
                }
                return Err(ManifestParseError::new(line_number, "expected column header"));
            }

            let fields = split_fields(line)
                .ok_or_else(|| ManifestParseError::new(line_number, "unterminated quote"))?;
            let [path, size, modified, digest]: [String; 4] = fields
                .try_into()
                .map_err(|_| ManifestParseError::new(line_number, "expected 4 fields"))?;
            let size_bytes = size
                .parse()
                .map_err(|_| ManifestParseError::new(line_number, "invalid size"))?;
            if decode_bytes(&path).is_none() {
                return Err(ManifestParseError::new(line_number, "invalid escape in path"));
            }

            entries.push(ManifestEntry {
                path,
                size_bytes,
                modified,
                digest,
            });
        }

        if !saw_columns {
            return Err(ManifestParseError::new(0, "missing column header"));
        }

        Ok(Self {
            created_at: created_at.ok_or_else(|| ManifestParseError::new(0, "missing created"))?,
            source: source.ok_or_else(|| ManifestParseError::new(0, "missing source"))?,
            algorithm: algorithm.unwrap_or_else(|| CHECKSUM_ALGORITHM.to_string()),
            entries,
        })
    }
}

/// Error raised by [`Manifest::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid manifest at line {line}: {message}")]
pub struct ManifestParseError {
    pub line: usize,
    pub message: String,
}

impl ManifestParseError {
    fn new(line: usize, message: &str) -> Self {
        Self {
            line,
            message: message.to_string(),
        }
    }
}

/// Encodes an archive name for the manifest, joining its components with `/`.
pub fn encode_path(name: &Path) -> String {
    name.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(encode_os_str(part)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Reverses [`encode_path`]. Returns None on a malformed escape, or on
/// platforms without byte paths when the result is not UTF-8.
pub fn decode_path(text: &str) -> Option<PathBuf> {
    let bytes = decode_bytes(text)?;

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        Some(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
    }

    #[cfg(not(unix))]
    {
        String::from_utf8(bytes).ok().map(PathBuf::from)
    }
}

fn encode_os_str(value: &OsStr) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        encode_bytes(value.as_bytes())
    }

    #[cfg(not(unix))]
    {
        encode_bytes(value.to_string_lossy().as_bytes())
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                out.push_str("\\\\");
            } else {
                out.push(c);
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{:02x}", byte);
        }
    }
    out
}

fn decode_bytes(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text.as_bytes();

    while let Some((&byte, tail)) = rest.split_first() {
        if byte != b'\\' {
            out.push(byte);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', tail @ ..] => {
                out.push(b'\\');
                rest = tail;
            }
            [b'x', hi, lo, tail @ ..] => {
                out.push((hex_digit(*hi)? << 4) | hex_digit(*lo)?);
                rest = tail;
            }
            _ => return None,
        }
    }
    Some(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|d| d as u8)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Splits one CSV line, honoring `"` quoting. Returns None on a dangling quote.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(current);
    Some(fields)
}
