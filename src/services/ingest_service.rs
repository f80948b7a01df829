//! src/services/ingest_service.rs
//!
//! IngestService: runs one transfer package through the intake pipeline:
//! checksum, structure, submission agreement, file list, record, upload and
//! queue. Runs for the same `(accession, application)` are serialized; the
//! record store, object store and queue are only touched once every
//! validation stage has passed.
//!
//! The three remote writes are not transactional. An upload failure marks the
//! freshly persisted record `Failed`; a publish failure leaves it
//! `Transferring` for the reconciler to finish.

use crate::{
    models::transfer::{Submitter, TransferRecord, TransferStatus},
    services::{
        agreement::{AgreementError, AgreementResolver, FALLBACK_NOTE},
        archive::{ArchiveError, ExtractionLimits, TransferPackage},
        checksum,
        key_lock::KeyedLocks,
        metadata::{self, MetadataError},
        object_store::ObjectStore,
        queue::QueuePublisher,
        record_store::{NewTransfer, TransferRecordStore},
        retry::{RetryPolicy, with_retry},
        validator::{self, StructureError},
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::{
    error::Error as StdError,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Object store key of the stored transfer archive.
pub fn transfer_key(accession: &str, application: &str) -> String {
    format!("transfers/TR_{accession}_{application}.zip")
}

/// Stages a run moves through, in order. A run that fails at any stage ends
/// in `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    ChecksumVerifying,
    StructureValidating,
    AgreementResolving,
    StructureRevalidating,
    MetadataExtracting,
    Persisting,
    Uploading,
    Enqueuing,
    Accepted,
    Rejected,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ChecksumVerifying => "checksum_verifying",
            Self::StructureValidating => "structure_validating",
            Self::AgreementResolving => "agreement_resolving",
            Self::StructureRevalidating => "structure_revalidating",
            Self::MetadataExtracting => "metadata_extracting",
            Self::Persisting => "persisting",
            Self::Uploading => "uploading",
            Self::Enqueuing => "enqueuing",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Validation {
        message: String,
        violations: Vec<String>,
    },
    #[error("{stage} failed: {source}")]
    Internal {
        stage: PipelineStage,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl IngestError {
    fn internal(stage: PipelineStage, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Internal {
            stage,
            source: source.into(),
        }
    }

    fn archive(stage: PipelineStage, err: ArchiveError) -> Self {
        match err {
            ArchiveError::EntryNotFound(path) => {
                Self::NotFound(format!("archive entry `{path}` not found"))
            }
            ArchiveError::Malformed(err) => {
                Self::BadRequest(format!("transfer is not a readable zip archive: {err}"))
            }
            err @ ArchiveError::TooLarge { .. } => Self::BadRequest(err.to_string()),
            other => Self::internal(stage, other),
        }
    }
}

impl From<StructureError> for IngestError {
    fn from(err: StructureError) -> Self {
        Self::Validation {
            message: "transfer package does not follow the standard transfer structure".into(),
            violations: err.missing,
        }
    }
}

impl From<AgreementError> for IngestError {
    fn from(err: AgreementError) -> Self {
        match err {
            AgreementError::TemplateNotFound { .. } => Self::NotFound(err.to_string()),
            AgreementError::Store(err) => Self::internal(PipelineStage::AgreementResolving, err),
            AgreementError::Archive(err) => Self::archive(PipelineStage::AgreementResolving, err),
        }
    }
}

impl From<MetadataError> for IngestError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::FileListNotFound => Self::NotFound(err.to_string()),
            MetadataError::Invalid {
                message,
                violations,
            } => Self::Validation {
                message,
                violations,
            },
            MetadataError::Archive(err) => Self::archive(PipelineStage::MetadataExtracting, err),
        }
    }
}

/// One submission as received from the intake endpoint.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub archive: Bytes,
    /// SHA-256 the submitter computed over `archive`.
    pub checksum: String,
    pub accession: String,
    pub application: String,
    pub submitted_by: Submitter,
}

/// Returned once the job is on the queue.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub user: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub accession: String,
    pub application: String,
    pub file_location: String,
    /// Empty unless the stored submission agreement was injected.
    pub note: String,
}

/// Outcome of one reconciler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub republished: usize,
    pub failed: usize,
}

/// Hands out `job-<epoch-millis>` ids, bumping the millisecond when two
/// requests land in the same one.
#[derive(Debug, Default)]
struct JobIds {
    last: AtomicI64,
}

impl JobIds {
    fn next(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut previous = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(previous + 1);
            match self.last.compare_exchange(
                previous,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return format!("job-{candidate}"),
                Err(actual) => previous = actual,
            }
        }
    }
}

fn validate_identifier(label: &str, value: &str) -> Result<(), IngestError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(IngestError::BadRequest(format!(
            "{label} must be 1-{MAX_IDENTIFIER_LEN} letters, digits or hyphens, got `{value}`"
        )))
    }
}

fn validate_request(request: &IngestRequest) -> Result<(), IngestError> {
    if request.archive.is_empty() {
        return Err(IngestError::BadRequest("Missing buffer.".into()));
    }
    if request.checksum.trim().is_empty() {
        return Err(IngestError::BadRequest("Missing checksum.".into()));
    }
    validate_identifier("accession", &request.accession)?;
    validate_identifier("application", &request.application)?;
    if request.submitted_by.name.trim().is_empty() || request.submitted_by.email.trim().is_empty() {
        return Err(IngestError::BadRequest(
            "submittedBy must include a name and an email".into(),
        ));
    }
    Ok(())
}

fn enter(stage: PipelineStage) {
    debug!(%stage, "pipeline stage");
}

#[derive(Clone)]
pub struct IngestService {
    records: TransferRecordStore,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn QueuePublisher>,
    agreements: AgreementResolver,
    locks: KeyedLocks,
    retry: RetryPolicy,
    queue_name: String,
    job_ids: Arc<JobIds>,
    limits: ExtractionLimits,
}

impl IngestService {
    pub fn new(
        records: TransferRecordStore,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn QueuePublisher>,
        retry: RetryPolicy,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            agreements: AgreementResolver::new(store.clone(), retry),
            records,
            store,
            queue,
            locks: KeyedLocks::new(),
            retry,
            queue_name: queue_name.into(),
            job_ids: Arc::new(JobIds::default()),
            limits: ExtractionLimits::default(),
        }
    }

    /// Bound how much any one submission may decompress to.
    pub fn with_extraction_limits(mut self, limits: ExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn records(&self) -> &TransferRecordStore {
        &self.records
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run `request` through the whole pipeline.
    ///
    /// Waits for any in-flight run on the same accession/application, so the
    /// stored record and the stored archive always belong to the same attempt.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, IngestError> {
        validate_request(&request)?;

        let span = info_span!(
            "ingest",
            accession = %request.accession,
            application = %request.application,
            job_id = field::Empty,
        );

        async move {
            let lock_key = format!("{}_{}", request.accession, request.application);
            let _guard = self.locks.acquire(&lock_key).await;

            let job_id = self.job_ids.next();
            Span::current().record("job_id", job_id.as_str());
            enter(PipelineStage::Received);

            match self.run(&job_id, request).await {
                Ok(receipt) => {
                    info!(stage = %PipelineStage::Accepted, file_location = %receipt.file_location, "Job added to queue.");
                    Ok(receipt)
                }
                Err(err) => {
                    warn!(stage = %PipelineStage::Rejected, error = %err, "transfer rejected");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job_id: &str, request: IngestRequest) -> Result<IngestReceipt, IngestError> {
        let IngestRequest {
            archive,
            checksum: declared,
            accession,
            application,
            submitted_by,
        } = request;

        enter(PipelineStage::ChecksumVerifying);
        if !checksum::verify(&archive, &declared) {
            return Err(IngestError::BadRequest(
                "Checksum of buffer and body.checksum do not match.".into(),
            ));
        }
        let package = TransferPackage::from_bytes(archive)
            .map_err(|err| IngestError::archive(PipelineStage::ChecksumVerifying, err))?
            .with_limits(self.limits);

        enter(PipelineStage::StructureValidating);
        validator::validate_structure(&package)?;

        enter(PipelineStage::AgreementResolving);
        let resolution = self
            .agreements
            .resolve(package, &accession, &application)
            .await?;

        enter(PipelineStage::StructureRevalidating);
        validator::validate_structure_with_agreement(&resolution.package)?;

        enter(PipelineStage::MetadataExtracting);
        let extracted = metadata::extract(&resolution.package, &accession, &application)?;
        metadata::check_agreement(&resolution.package, &resolution.path, &accession, &application)?;
        debug!(
            file_list = %extracted.file_list_path,
            agreement = %resolution.path,
            "package documentation validated"
        );

        let package = resolution.package;
        let stored_checksum = checksum::digest(package.bytes());

        enter(PipelineStage::Persisting);
        let new = NewTransfer {
            job_id: job_id.to_string(),
            accession: accession.clone(),
            application: application.clone(),
            checksum: stored_checksum,
            output_file_type: extracted.output_file_type,
            submitted_by: submitted_by.clone(),
            metadata: extracted.metadata,
        };
        let (records, new_ref) = (&self.records, &new);
        with_retry(&self.retry, "record_store.create_or_update", move || {
            records.create_or_update(new_ref)
        })
        .await
        .map_err(|err| IngestError::internal(PipelineStage::Persisting, err))?;

        enter(PipelineStage::Uploading);
        let key = transfer_key(&accession, &application);
        let (store, key_ref, body) = (&self.store, key.as_str(), package.bytes());
        let stored = match with_retry(&self.retry, "object_store.put_transfer", move || {
            store.put(key_ref, body.clone())
        })
        .await
        {
            Ok(stored) => {
                debug!(key = %stored.key, size = stored.size_bytes, etag = %stored.etag, "archive stored");
                stored
            }
            Err(err) => {
                self.compensate(job_id).await;
                return Err(IngestError::internal(PipelineStage::Uploading, err));
            }
        };
        with_retry(&self.retry, "record_store.mark_uploaded", move || {
            records.mark_uploaded(job_id)
        })
        .await
        .map_err(|err| IngestError::internal(PipelineStage::Uploading, err))?;

        enter(PipelineStage::Enqueuing);
        self.publish(job_id).await?;

        Ok(IngestReceipt {
            user: submitted_by.name,
            job_id: job_id.to_string(),
            accession,
            application,
            file_location: stored.key,
            note: if resolution.used_fallback {
                FALLBACK_NOTE.to_string()
            } else {
                String::new()
            },
        })
    }

    async fn publish(&self, job_id: &str) -> Result<(), IngestError> {
        let (queue, queue_name) = (&self.queue, self.queue_name.as_str());
        let outcome = with_retry(&self.retry, "queue.publish", move || {
            queue.publish(queue_name, job_id)
        })
        .await
        .map_err(|err| IngestError::internal(PipelineStage::Enqueuing, err))?;
        debug!(job_id, queue = queue_name, ?outcome, "published job");
        Ok(())
    }

    /// Undo a persisted attempt whose archive never reached the store.
    async fn compensate(&self, job_id: &str) {
        let records = &self.records;
        match with_retry(&self.retry, "record_store.mark_failed", move || {
            records.mark_status(job_id, TransferStatus::Failed)
        })
        .await
        {
            Ok(true) => info!(job_id, "marked transfer failed after upload error"),
            Ok(false) => debug!(job_id, "transfer already left Transferring"),
            // The reconciler fails it later: `uploaded_on` is still unset.
            Err(err) => error!(job_id, error = %err, "could not mark transfer failed"),
        }
    }

    /// Finish every `Transferring` attempt that is no longer running.
    ///
    /// Uploaded attempts missing from the queue are published again. An
    /// attempt without `uploaded_on` is checked against the object store
    /// first: if the stored archive carries the recorded checksum the upload
    /// did land, so it is marked uploaded and published. Otherwise it is
    /// marked `Failed`.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, IngestError> {
        let mut report = ReconcileReport::default();
        let pending = self
            .records
            .list_transferring()
            .await
            .map_err(|err| IngestError::internal(PipelineStage::Persisting, err))?;

        for candidate in pending {
            if self.is_published(&candidate.job_id).await? {
                continue;
            }

            let lock_key = format!("{}_{}", candidate.accession, candidate.application);
            let _guard = self.locks.acquire(&lock_key).await;

            let Some(record) = self.reload(&candidate).await? else {
                continue;
            };
            if self.is_published(&record.job_id).await? {
                continue;
            }

            if record.uploaded_on.is_some() || self.upload_landed(&record).await? {
                if record.uploaded_on.is_none() {
                    self.records
                        .mark_uploaded(&record.job_id)
                        .await
                        .map_err(|err| IngestError::internal(PipelineStage::Uploading, err))?;
                    info!(job_id = %record.job_id, "found stored archive for unmarked upload");
                }
                self.publish(&record.job_id).await?;
                info!(job_id = %record.job_id, "republished transfer job");
                report.republished += 1;
            } else {
                let marked = self
                    .records
                    .mark_status(&record.job_id, TransferStatus::Failed)
                    .await
                    .map_err(|err| IngestError::internal(PipelineStage::Persisting, err))?;
                if marked {
                    warn!(job_id = %record.job_id, "transfer was never uploaded; marked failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// `candidate` re-read under the key lock, if it is still `Transferring`.
    /// A resubmission replaces the job id, so a hit is always the current
    /// attempt for its key.
    async fn reload(&self, candidate: &TransferRecord) -> Result<Option<TransferRecord>, IngestError> {
        let current = self
            .records
            .get_by_job(&candidate.job_id)
            .await
            .map_err(|err| IngestError::internal(PipelineStage::Persisting, err))?;
        Ok(current.filter(|record| record.status == TransferStatus::Transferring))
    }

    /// Whether the stored archive for `record`'s key is the one it describes.
    async fn upload_landed(&self, record: &TransferRecord) -> Result<bool, IngestError> {
        let key = transfer_key(&record.accession, &record.application);
        let (store, key_ref) = (&self.store, key.as_str());
        let stored = with_retry(&self.retry, "object_store.get_transfer", move || {
            store.get(key_ref)
        })
        .await
        .map_err(|err| IngestError::internal(PipelineStage::Uploading, err))?;
        Ok(stored.is_some_and(|bytes| checksum::verify(&bytes, &record.checksum)))
    }

    async fn is_published(&self, job_id: &str) -> Result<bool, IngestError> {
        self.queue
            .is_published(job_id)
            .await
            .map_err(|err| IngestError::internal(PipelineStage::Enqueuing, err))
    }

    /// Run [`Self::reconcile_once`] now and then every `interval`.
    pub fn spawn_reconciler(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match service.reconcile_once().await {
                    Ok(report) if report != ReconcileReport::default() => {
                        info!(
                            republished = report.republished,
                            failed = report.failed,
                            "reconciled pending transfers"
                        );
                    }
                    Ok(_) => debug!("no pending transfers to reconcile"),
                    Err(err) => error!(error = %err, "reconciler pass failed"),
                }
            }
        })
    }
}
