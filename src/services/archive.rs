//! In-memory zip archive access for transfer packages.
//!
//! A [`TransferPackage`] is an immutable snapshot: the archive bytes plus the
//! entry listing read from its central directory. Adding an entry never
//! touches the original bytes; it rebuilds a complete archive and returns a
//! new snapshot.
//!
//! Decompression is bounded by [`ExtractionLimits`]: per entry, and across
//! every read made through one package and the snapshots derived from it.

use bytes::Bytes;
use regex::Regex;
use std::{
    io::{self, Cursor, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use zip::{
    CompressionMethod, DateTime as ZipDateTime, ZipArchive, ZipWriter, result::ZipError,
    write::SimpleFileOptions,
};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is not a readable zip file: {0}")]
    Malformed(#[source] ZipError),
    #[error("entry `{0}` not found in archive")]
    EntryNotFound(String),
    #[error("entry `{path}` inflates past the {limit}-byte extraction limit")]
    TooLarge { path: String, limit: u64 },
    #[error("failed to rewrite archive: {0}")]
    Rewrite(#[source] ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// One record of the archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Full path inside the archive, `/`-separated.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub is_dir: bool,
}

impl ArchiveEntry {
    /// Last path component, without any trailing `/`.
    pub fn file_name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Directory portion of the path, without a trailing `/` (empty at root).
    pub fn parent(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }
}

/// Caps on decompressed bytes. Declared sizes in the central directory are
/// never trusted; reads stop one byte past the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: 512 * 1024 * 1024,
            max_total_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferPackage {
    bytes: Bytes,
    entries: Vec<ArchiveEntry>,
    limits: ExtractionLimits,
    /// Bytes inflated so far, shared with derived snapshots.
    inflated: Arc<AtomicU64>,
}

impl TransferPackage {
    /// Parse `bytes` as a zip archive and capture its entry listing.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> ArchiveResult<Self> {
        let bytes = bytes.into();
        let mut archive = ZipArchive::new(Cursor::new(bytes.clone())).map_err(ArchiveError::Malformed)?;

        let mut entries = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let entry = archive.by_index_raw(idx).map_err(ArchiveError::Malformed)?;
            entries.push(ArchiveEntry {
                path: entry.name().to_string(),
                size: entry.size(),
                is_dir: entry.is_dir(),
            });
        }

        Ok(Self {
            bytes,
            entries,
            limits: ExtractionLimits::default(),
            inflated: Arc::default(),
        })
    }

    pub fn with_limits(mut self, limits: ExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Decompressed bytes read so far.
    pub fn inflated_bytes(&self) -> u64 {
        self.inflated.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Entries in central-directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Non-directory entries only.
    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|entry| !entry.is_dir)
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files().any(|entry| entry.path == path)
    }

    /// True when `dir` appears as a directory, either through an explicit
    /// directory record or as the prefix of any entry.
    pub fn has_directory(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.entries.iter().any(|entry| entry.path.starts_with(&prefix))
    }

    /// Find the first file directly inside `directory` whose file name
    /// matches `pattern`.
    pub fn find_entry(&self, directory: &str, pattern: &Regex) -> Option<&ArchiveEntry> {
        find_in_directory(&self.entries, directory, pattern)
    }

    /// Read and decompress the bytes of the entry at `path`.
    pub fn read_entry(&self, path: &str) -> ArchiveResult<Vec<u8>> {
        let mut archive = self.open()?;
        let mut file = match archive.by_name(path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(ArchiveError::EntryNotFound(path.to_string())),
            Err(err) => return Err(ArchiveError::Malformed(err)),
        };

        let remaining = self
            .limits
            .max_total_bytes
            .saturating_sub(self.inflated.load(Ordering::SeqCst));
        let cap = self.limits.max_entry_bytes.min(remaining);

        let mut contents = Vec::new();
        file.by_ref()
            .take(cap.saturating_add(1))
            .read_to_end(&mut contents)?;
        let read = contents.len() as u64;
        self.inflated.fetch_add(read.min(cap), Ordering::SeqCst);

        if read > cap {
            let limit = if cap == self.limits.max_entry_bytes {
                self.limits.max_entry_bytes
            } else {
                self.limits.max_total_bytes
            };
            return Err(ArchiveError::TooLarge {
                path: path.to_string(),
                limit,
            });
        }
        Ok(contents)
    }

    /// Build a new archive holding every existing entry plus `path`.
    ///
    /// Existing entries are raw-copied without recompression. An existing
    /// entry with the same path is replaced, so the rewritten central
    /// directory never carries duplicates.
    pub fn with_added_entry(&self, path: &str, contents: &[u8]) -> ArchiveResult<Self> {
        let mut source = self.open()?;
        let capacity = self.bytes.len() + contents.len() + 256;
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(capacity)));

        for idx in 0..source.len() {
            let entry = source.by_index_raw(idx).map_err(ArchiveError::Malformed)?;
            if entry.name() == path {
                continue;
            }
            writer.raw_copy_file(entry).map_err(ArchiveError::Rewrite)?;
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(ZipDateTime::default())
            .unix_permissions(0o644);
        writer.start_file(path, options).map_err(ArchiveError::Rewrite)?;
        writer.write_all(contents)?;
        let cursor = writer.finish().map_err(ArchiveError::Rewrite)?;

        let rebuilt = Self::from_bytes(cursor.into_inner())?;
        Ok(Self {
            limits: self.limits,
            inflated: Arc::clone(&self.inflated),
            ..rebuilt
        })
    }

    fn open(&self) -> ArchiveResult<ZipArchive<Cursor<Bytes>>> {
        ZipArchive::new(Cursor::new(self.bytes.clone())).map_err(ArchiveError::Malformed)
    }
}

/// Pure lookup over an entry listing: the first file whose parent is
/// `directory` and whose file name matches `pattern`.
pub fn find_in_directory<'a>(
    entries: &'a [ArchiveEntry],
    directory: &str,
    pattern: &Regex,
) -> Option<&'a ArchiveEntry> {
    let directory = directory.trim_end_matches('/');
    entries
        .iter()
        .filter(|entry| !entry.is_dir)
        .find(|entry| entry.parent() == directory && pattern.is_match(entry.file_name()))
}
