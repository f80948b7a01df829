//! Represents a blob held by the durable object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Receipt for a blob written to the object store.
///
/// Holds the metadata of the stored bytes, not the bytes themselves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key (path-like identifier, e.g. `transfers/TR_1_2.zip`).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 of the payload as reported by the store.
    pub etag: String,

    /// When the store accepted the write.
    pub last_modified: DateTime<Utc>,
}
