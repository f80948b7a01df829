//! Defines routes for transfer intake.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`: liveness
//!   - `GET  /readyz`: SQLite and object store readiness
//!
//! - **Transfers**
//!   - `POST /transfers`: multipart intake of a standard transfer
//!   - `GET  /transfers/{accession}/{application}`: stored record lookup

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        transfer_handlers::{create_transfer, get_transfer},
    },
    services::ingest_service::IngestService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all intake routes.
///
/// The router carries shared state (`IngestService`) to all handlers. Request
/// bodies may be up to `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<IngestService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/transfers", post(create_transfer))
        .route("/transfers/{accession}/{application}", get(get_transfer))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
