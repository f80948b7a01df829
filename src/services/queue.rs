//! Ingestion queue publishing.
//!
//! Downstream accessioning consumes job references from a named queue with
//! at-least-once semantics. The job id doubles as the idempotency key: a
//! second publish of the same job is acknowledged without a new message.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Queue feeding the standard transfer accessioning workflow.
pub const STANDARD_TRANSFER_QUEUE: &str = "standard-transfer";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Enqueued,
    /// The job id was already on the queue; nothing new was written.
    AlreadyQueued,
}

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, queue: &str, job_id: &str) -> Result<PublishOutcome, QueueError>;

    async fn is_published(&self, job_id: &str) -> Result<bool, QueueError>;
}

/// Durable queue stored in the service database.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Arc<SqlitePool>,
}

impl SqliteQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueuePublisher for SqliteQueue {
    async fn publish(&self, queue: &str, job_id: &str) -> Result<PublishOutcome, QueueError> {
        let result = sqlx::query(
            "INSERT INTO queue_messages (job_id, queue_name, enqueued_at) VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(job_id)
        .bind(queue)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!(queue, job_id, "job already queued");
            Ok(PublishOutcome::AlreadyQueued)
        } else {
            debug!(queue, job_id, "job queued");
            Ok(PublishOutcome::Enqueued)
        }
    }

    async fn is_published(&self, job_id: &str) -> Result<bool, QueueError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM queue_messages WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }
}
