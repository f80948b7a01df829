//! src/services/record_store.rs
//!
//! TransferRecordStore: persistent transfer records backed by SQLite.
//! One row per `(accession, application)`; every resubmission overwrites the
//! row in place with the new attempt's job id, checksum and metadata.

use crate::models::{
    filelist::FileListMetadata,
    transfer::{Submitter, TransferRecord, TransferStatus},
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("stored transfer has corrupt field `{field}`: {reason}")]
    Corrupt { field: &'static str, reason: String },
    #[error("status can only move forward from Transferring, not to {0}")]
    InvalidTransition(TransferStatus),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type RecordResult<T> = Result<T, RecordStoreError>;

/// Fields written when an attempt passes validation.
#[derive(Clone, Debug)]
pub struct NewTransfer {
    pub job_id: String,
    pub accession: String,
    pub application: String,
    pub checksum: String,
    pub output_file_type: String,
    pub submitted_by: Submitter,
    pub metadata: FileListMetadata,
}

#[derive(FromRow)]
struct TransferRow {
    job_id: String,
    accession: String,
    application: String,
    checksum: String,
    status: String,
    output_file_type: String,
    submitter_name: String,
    submitter_email: String,
    folders_json: String,
    files_json: String,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
    uploaded_on: Option<DateTime<Utc>>,
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = RecordStoreError;

    fn try_from(row: TransferRow) -> RecordResult<Self> {
        let status = row
            .status
            .parse::<TransferStatus>()
            .map_err(|reason| RecordStoreError::Corrupt {
                field: "status",
                reason,
            })?;

        Ok(TransferRecord {
            job_id: row.job_id,
            accession: row.accession,
            application: row.application,
            checksum: row.checksum,
            status,
            output_file_type: row.output_file_type,
            submitted_by: Submitter {
                name: row.submitter_name,
                email: row.submitter_email,
            },
            folders: serde_json::from_str(&row.folders_json)?,
            files: serde_json::from_str(&row.files_json)?,
            created_on: row.created_on,
            updated_on: row.updated_on,
            uploaded_on: row.uploaded_on,
        })
    }
}

const TRANSFER_COLUMNS: &str = "job_id, accession, application, checksum, status, output_file_type,
     submitter_name, submitter_email, folders_json, files_json,
     created_on, updated_on, uploaded_on";

#[derive(Clone)]
pub struct TransferRecordStore {
    /// Shared SQLite connection pool.
    db: Arc<SqlitePool>,
}

impl TransferRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert or overwrite the record for `(accession, application)`.
    ///
    /// The attempt starts over as `Transferring` with no upload recorded;
    /// `created_on` keeps the date of the first accepted submission.
    pub async fn create_or_update(&self, new: &NewTransfer) -> RecordResult<TransferRecord> {
        let folders_json = serde_json::to_string(&new.metadata.folders)?;
        let files_json = serde_json::to_string(&new.metadata.files)?;
        let now = Utc::now();

        let sql = format!(
            r#"
            INSERT INTO transfers (
                job_id, accession, application, checksum, status, output_file_type,
                submitter_name, submitter_email, folders_json, files_json,
                created_on, updated_on, uploaded_on
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(accession, application) DO UPDATE SET
                job_id = excluded.job_id,
                checksum = excluded.checksum,
                status = excluded.status,
                output_file_type = excluded.output_file_type,
                submitter_name = excluded.submitter_name,
                submitter_email = excluded.submitter_email,
                folders_json = excluded.folders_json,
                files_json = excluded.files_json,
                updated_on = excluded.updated_on,
                uploaded_on = NULL
            RETURNING {TRANSFER_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, TransferRow>(&sql)
            .bind(&new.job_id)
            .bind(&new.accession)
            .bind(&new.application)
            .bind(&new.checksum)
            .bind(TransferStatus::Transferring.as_str())
            .bind(&new.output_file_type)
            .bind(&new.submitted_by.name)
            .bind(&new.submitted_by.email)
            .bind(folders_json)
            .bind(files_json)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await?;

        debug!(job_id = %new.job_id, "upserted transfer record");
        row.try_into()
    }

    pub async fn get(&self, accession: &str, application: &str) -> RecordResult<Option<TransferRecord>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE accession = ? AND application = ?"
        );
        sqlx::query_as::<_, TransferRow>(&sql)
            .bind(accession)
            .bind(application)
            .fetch_optional(&*self.db)
            .await?
            .map(TransferRecord::try_from)
            .transpose()
    }

    pub async fn get_by_job(&self, job_id: &str) -> RecordResult<Option<TransferRecord>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE job_id = ?");
        sqlx::query_as::<_, TransferRow>(&sql)
            .bind(job_id)
            .fetch_optional(&*self.db)
            .await?
            .map(TransferRecord::try_from)
            .transpose()
    }

    /// Record that the current attempt's archive reached the object store.
    ///
    /// Returns false when `job_id` is no longer the live `Transferring` attempt.
    pub async fn mark_uploaded(&self, job_id: &str) -> RecordResult<bool> {
        let result = sqlx::query(
            "UPDATE transfers SET uploaded_on = ?, updated_on = ?
             WHERE job_id = ? AND status = ?",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(job_id)
        .bind(TransferStatus::Transferring.as_str())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move the attempt `job_id` from `Transferring` to a terminal status.
    ///
    /// Returns false when the attempt is unknown, superseded or already terminal.
    pub async fn mark_status(&self, job_id: &str, status: TransferStatus) -> RecordResult<bool> {
        if !status.is_terminal() {
            return Err(RecordStoreError::InvalidTransition(status));
        }

        let result = sqlx::query(
            "UPDATE transfers SET status = ?, updated_on = ?
             WHERE job_id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .bind(TransferStatus::Transferring.as_str())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every record still in `Transferring`, oldest update first.
    pub async fn list_transferring(&self) -> RecordResult<Vec<TransferRecord>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE status = ? ORDER BY updated_on ASC"
        );
        sqlx::query_as::<_, TransferRow>(&sql)
            .bind(TransferStatus::Transferring.as_str())
            .fetch_all(&*self.db)
            .await?
            .into_iter()
            .map(TransferRecord::try_from)
            .collect()
    }
}
