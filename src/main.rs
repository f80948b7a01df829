use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{
    ingest_service::IngestService,
    object_store::{LocalObjectStore, ObjectStore, S3HttpObjectStore},
    queue::SqliteQueue,
    record_store::TransferRecordStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting transfer-intake with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&db)
        .await
        .context("applying database schema")?;

    // --- Object store backend ---
    let store: Arc<dyn ObjectStore> = match &cfg.object_store_endpoint {
        Some(endpoint) => {
            let client = reqwest::Client::builder()
                .build()
                .context("building object store HTTP client")?;
            tracing::info!(
                "Using S3-compatible object store at {} (bucket {})",
                endpoint,
                cfg.object_store_bucket
            );
            if cfg.object_store_credentials.is_none() {
                tracing::warn!("No object store credentials configured; requests are sent unsigned");
            }
            Arc::new(
                S3HttpObjectStore::new(client, endpoint, &cfg.object_store_bucket)
                    .context("configuring object store endpoint")?
                    .with_credentials(cfg.object_store_credentials.clone()),
            )
        }
        None => {
            // --- Ensure storage directory exists ---
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            tracing::info!("Using local object store at {}", cfg.storage_dir);
            Arc::new(LocalObjectStore::new(&cfg.storage_dir))
        }
    };

    // --- Initialize core service ---
    let service = IngestService::new(
        TransferRecordStore::new(db.clone()),
        store,
        Arc::new(SqliteQueue::new(db.clone())),
        cfg.retry_policy(),
        cfg.queue_name.clone(),
    )
    .with_extraction_limits(cfg.extraction_limits());
    service.spawn_reconciler(cfg.reconcile_interval());

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
