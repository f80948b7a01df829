//! Represents the digital file list shipped in a package's `documentation/`
//! directory.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Top-level file list document.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileListDocument {
    /// Format the producing tool emitted (e.g. `json`).
    pub output_file_type: Option<String>,

    pub metadata: FileListMetadata,
}

/// Normalized folder and file metadata for one transfer.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FileListMetadata {
    #[serde(default)]
    pub admin: Option<AdminMeta>,

    /// Folder path (relative to the archive root) to its retention metadata.
    #[serde(default)]
    pub folders: BTreeMap<String, FolderMeta>,

    /// Folder path to the files it holds.
    #[serde(default)]
    pub files: BTreeMap<String, Vec<FileMeta>>,
}

/// Identifiers the producing agency stamped into the file list.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AdminMeta {
    pub accession: Option<String>,
    pub application: Option<String>,
}

/// Records-management metadata for a folder.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderMeta {
    /// Records schedule number.
    pub schedule: Option<String>,
    pub classification: Option<String>,
    pub file: Option<String>,
    /// Office of primary responsibility: whether this copy is the official record.
    pub opr: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Superseded/obsolete date.
    pub so_date: Option<String>,
    /// Final disposition date.
    pub fd_date: Option<String>,
}

/// Metadata captured for a single file when the package was assembled.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Path of the file inside the archive.
    pub filepath: String,
    pub filename: String,
    /// Size in bytes. Producers send either a number or a string.
    #[serde(deserialize_with = "string_or_number")]
    pub size: String,
    /// SHA-256 of the file contents.
    pub checksum: String,
    pub birthtime: String,
    pub last_modified: String,
    pub last_accessed: String,
    pub last_saved: Option<String>,
    pub authors: Option<String>,
    pub owner: Option<String>,
    pub company: Option<String>,
    pub computer: Option<String>,
    pub content_type: Option<String>,
    pub program_name: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
