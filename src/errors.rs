use crate::services::{ingest_service::IngestError, record_store::RecordStoreError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Itemized problems for validation failures; empty otherwise.
    pub violations: Vec<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            violations: Vec::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 422 carrying every violation found.
    pub fn validation(msg: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
            violations,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        });
        if !self.violations.is_empty() {
            body["violations"] = json!(self.violations);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::BadRequest(msg) => AppError::bad_request(msg),
            IngestError::NotFound(msg) => AppError::not_found(msg),
            IngestError::Validation {
                message,
                violations,
            } => AppError::validation(message, violations),
            err @ IngestError::Internal { .. } => {
                tracing::error!(error = ?err, "ingest failed");
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<RecordStoreError> for AppError {
    fn from(err: RecordStoreError) -> Self {
        tracing::error!(error = ?err, "record store failed");
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_list_every_violation() {
        let err = AppError::from(IngestError::Validation {
            message: "bad package".into(),
            violations: vec!["one".into(), "two".into()],
        });
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], 422);
        assert_eq!(body["violations"], json!(["one", "two"]));
    }

    #[tokio::test]
    async fn plain_errors_omit_violations() {
        let (status, body) = body_json(IngestError::NotFound("no template".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no template");
        assert!(body.get("violations").is_none());
    }
}
