//! HTTP handlers for transfer intake and status lookup.
//! Collects the multipart submission into an `IngestRequest` and delegates
//! every pipeline concern to `IngestService`.

use crate::{
    errors::AppError,
    models::transfer::{Submitter, TransferRecord},
    services::ingest_service::{IngestReceipt, IngestRequest, IngestService},
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

/// Body of a successful `POST /transfers`.
#[derive(Debug, Serialize)]
pub struct CreateTransferResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: IngestReceipt,
}

/// Multipart fields gathered before validation.
#[derive(Debug, Default)]
struct TransferForm {
    file: Option<Bytes>,
    checksum: Option<String>,
    accession: Option<String>,
    application: Option<String>,
    submitted_by: Option<Submitter>,
    submitter_name: Option<String>,
    submitter_email: Option<String>,
}

impl TransferForm {
    fn into_request(self) -> Result<IngestRequest, AppError> {
        let submitted_by = match (self.submitted_by, self.submitter_name, self.submitter_email) {
            (Some(submitter), _, _) => submitter,
            (None, Some(name), Some(email)) => Submitter { name, email },
            _ => return Err(AppError::bad_request("Missing submittedBy.")),
        };

        Ok(IngestRequest {
            archive: self
                .file
                .ok_or_else(|| AppError::bad_request("Missing buffer."))?,
            checksum: required(self.checksum, "checksum")?,
            accession: required(self.accession, "accession")?,
            application: required(self.application, "application")?,
            submitted_by,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("Missing {field}.")))
}

/// Accept a standard transfer: `POST /transfers` (multipart).
///
/// Fields: `file`, `checksum`, `accession`, `application`, and `submittedBy`
/// as JSON or as `submittedBy[name]` / `submittedBy[email]`.
pub async fn create_transfer(
    State(service): State<IngestService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = TransferForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => form.file = Some(field.bytes().await?),
            "checksum" => form.checksum = Some(field.text().await?),
            "accession" => form.accession = Some(field.text().await?),
            "application" => form.application = Some(field.text().await?),
            "submittedBy" => {
                let text = field.text().await?;
                let submitter = serde_json::from_str(&text).map_err(|err| {
                    AppError::bad_request(format!(
                        "submittedBy must be a JSON object with name and email: {err}"
                    ))
                })?;
                form.submitted_by = Some(submitter);
            }
            "submittedBy[name]" => form.submitter_name = Some(field.text().await?),
            "submittedBy[email]" => form.submitter_email = Some(field.text().await?),
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let receipt = service.ingest(form.into_request()?).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTransferResponse {
            success: true,
            message: "Job added to queue.",
            data: receipt,
        }),
    ))
}

/// Look up the stored record: `GET /transfers/{accession}/{application}`.
pub async fn get_transfer(
    State(service): State<IngestService>,
    Path((accession, application)): Path<(String, String)>,
) -> Result<Json<TransferRecord>, AppError> {
    let record = service
        .records()
        .get(&accession, &application)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!(
                "transfer for accession `{accession}` and application `{application}` not found"
            ))
        })?;
    Ok(Json(record))
}
