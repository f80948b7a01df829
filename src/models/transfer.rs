//! Represents a transfer accepted for accessioning.

use crate::models::filelist::{FileMeta, FolderMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Lifecycle of one transfer attempt. Moves forward only:
/// `Transferring` then either `Completed` or `Failed`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Transferring,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transferring => "Transferring",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transferring)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Transferring" => Ok(Self::Transferring),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown transfer status `{other}`")),
        }
    }
}

/// Person who submitted the package.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Submitter {
    pub name: String,
    pub email: String,
}

/// Persistent record of a transfer, keyed by `(accession, application)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Identifier of the latest intake attempt.
    #[serde(rename = "jobID")]
    pub job_id: String,

    pub accession: String,

    pub application: String,

    /// SHA-256 of the archive exactly as stored.
    pub checksum: String,

    pub status: TransferStatus,

    pub output_file_type: String,

    pub submitted_by: Submitter,

    pub folders: BTreeMap<String, FolderMeta>,

    pub files: BTreeMap<String, Vec<FileMeta>>,

    /// When the transfer was first accepted.
    pub created_on: DateTime<Utc>,

    pub updated_on: DateTime<Utc>,

    /// Set once the archive bytes of the current attempt reached the object store.
    pub uploaded_on: Option<DateTime<Utc>>,
}
