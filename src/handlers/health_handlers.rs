//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and object store I/O

use crate::services::ingest_service::IngestService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE_BODY: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Performs a best-effort put/get/delete of a probe object under `readyz/`.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(service): State<IngestService>) -> impl IntoResponse {
    // 1) SQLite check
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(service.records().pool())
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Object store round trip
    let store = service.store();
    let key = format!("readyz/{}", Uuid::new_v4());
    let store_check = match store.put(&key, Bytes::from_static(PROBE_BODY)).await {
        Ok(_) => {
            let read = store.get(&key).await;
            let cleanup = store.delete(&key).await;
            match (read, cleanup) {
                (Ok(Some(bytes)), Ok(_)) if bytes.as_ref() == PROBE_BODY => (true, None),
                (Ok(Some(bytes)), Err(e)) if bytes.as_ref() == PROBE_BODY => {
                    (true, Some(format!("could not remove probe object: {}", e)))
                }
                (Ok(Some(_)), _) => (false, Some("probe object content mismatch".to_string())),
                (Ok(None), _) => (false, Some("probe object vanished".to_string())),
                (Err(e), _) => (false, Some(format!("could not read probe object: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write probe object: {}", e))),
    };

    // Build response JSON
    let sqlite_ok = sqlite_check.0;
    let store_ok = store_check.0;
    let overall_ok = sqlite_ok && store_ok;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_ok,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "object_store",
        CheckStatus {
            ok: store_ok,
            error: store_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
