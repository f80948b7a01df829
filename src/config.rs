use crate::services::{
    archive::ExtractionLimits, queue::STANDARD_TRANSFER_QUEUE, retry::RetryPolicy,
    sigv4::S3Credentials,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "TRANSFER_INTAKE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root of the local object store; used when no endpoint is configured.
    pub storage_dir: String,
    /// S3-compatible endpoint, e.g. `http://127.0.0.1:9000`.
    pub object_store_endpoint: Option<String>,
    pub object_store_bucket: String,
    /// Signing credentials for the endpoint; `None` sends requests unsigned.
    pub object_store_credentials: Option<S3Credentials>,
    pub queue_name: String,
    pub remote_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub reconcile_interval_secs: u64,
    pub max_upload_bytes: usize,
    /// Largest decompressed size of any single archive entry.
    pub max_entry_bytes: u64,
    /// Largest decompressed total read from one archive.
    pub max_extracted_bytes: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Transfer package intake service")]
pub struct Args {
    /// Host to bind to (overrides TRANSFER_INTAKE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TRANSFER_INTAKE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TRANSFER_INTAKE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory of the local object store (overrides TRANSFER_INTAKE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// S3-compatible endpoint (overrides TRANSFER_INTAKE_OBJECT_STORE_ENDPOINT)
    #[arg(long)]
    pub object_store_endpoint: Option<String>,

    /// Bucket holding transfers and agreement templates (overrides TRANSFER_INTAKE_OBJECT_STORE_BUCKET)
    #[arg(long)]
    pub object_store_bucket: Option<String>,

    /// Access key id for request signing (overrides TRANSFER_INTAKE_OBJECT_STORE_ACCESS_KEY_ID,
    /// then AWS_ACCESS_KEY_ID). The secret is only read from the environment.
    #[arg(long)]
    pub object_store_access_key_id: Option<String>,

    /// Signing region (overrides TRANSFER_INTAKE_OBJECT_STORE_REGION)
    #[arg(long)]
    pub object_store_region: Option<String>,

    /// Queue receiving accepted jobs (overrides TRANSFER_INTAKE_QUEUE_NAME)
    #[arg(long)]
    pub queue_name: Option<String>,

    /// Deadline per remote call attempt (overrides TRANSFER_INTAKE_REMOTE_TIMEOUT_MS)
    #[arg(long)]
    pub remote_timeout_ms: Option<u64>,

    /// Attempts per remote call (overrides TRANSFER_INTAKE_RETRY_ATTEMPTS)
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// First retry delay, doubled per attempt (overrides TRANSFER_INTAKE_RETRY_BASE_BACKOFF_MS)
    #[arg(long)]
    pub retry_base_backoff_ms: Option<u64>,

    /// Seconds between reconciler passes (overrides TRANSFER_INTAKE_RECONCILE_INTERVAL_SECS)
    #[arg(long)]
    pub reconcile_interval_secs: Option<u64>,

    /// Largest accepted request body (overrides TRANSFER_INTAKE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Per-entry decompression cap (overrides TRANSFER_INTAKE_MAX_ENTRY_BYTES)
    #[arg(long)]
    pub max_entry_bytes: Option<u64>,

    /// Whole-archive decompression cap (overrides TRANSFER_INTAKE_MAX_EXTRACTED_BYTES)
    #[arg(long)]
    pub max_extracted_bytes: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `TRANSFER_INTAKE_{name}`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let var = format!("{ENV_PREFIX}{name}");
    match env::var(&var) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", var, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", var)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env_raw(&format!("{ENV_PREFIX}{name}"))
}

fn env_raw(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

/// Both halves of the key pair or neither.
fn credentials(
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    region: String,
) -> Result<Option<S3Credentials>> {
    match (access_key_id, secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(Some(S3Credentials {
            access_key_id,
            secret_access_key,
            region,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => anyhow::bail!("object store access key id is set without a secret access key"),
        (None, Some(_)) => anyhow::bail!("object store secret access key is set without an access key id"),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win; anything not given on the command line comes from the
    /// environment, then from built-in defaults.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_or("HOST", "0.0.0.0".to_string())?;
        let env_port = env_or("PORT", 3000u16)?;
        let env_db = env_or(
            "DATABASE_URL",
            "sqlite://./data/meta/transfer_intake.db".to_string(),
        )?;
        let env_storage = env_or("STORAGE_DIR", "./data/objects".to_string())?;
        let env_bucket = env_or("OBJECT_STORE_BUCKET", "transfers".to_string())?;
        let env_queue = env_or("QUEUE_NAME", STANDARD_TRANSFER_QUEUE.to_string())?;
        let env_timeout = env_or("REMOTE_TIMEOUT_MS", 30_000u64)?;
        let env_attempts = env_or("RETRY_ATTEMPTS", 3u32)?;
        let env_backoff = env_or("RETRY_BASE_BACKOFF_MS", 200u64)?;
        let env_reconcile = env_or("RECONCILE_INTERVAL_SECS", 60u64)?;
        let env_max_upload = env_or("MAX_UPLOAD_BYTES", 512 * 1024 * 1024usize)?;
        let defaults = ExtractionLimits::default();
        let env_max_entry = env_or("MAX_ENTRY_BYTES", defaults.max_entry_bytes)?;
        let env_max_extracted = env_or("MAX_EXTRACTED_BYTES", defaults.max_total_bytes)?;
        let env_region = env_or("OBJECT_STORE_REGION", "us-east-1".to_string())?;

        let object_store_credentials = credentials(
            args.object_store_access_key_id
                .or_else(|| env_opt("OBJECT_STORE_ACCESS_KEY_ID"))
                .or_else(|| env_raw("AWS_ACCESS_KEY_ID")),
            env_opt("OBJECT_STORE_SECRET_ACCESS_KEY").or_else(|| env_raw("AWS_SECRET_ACCESS_KEY")),
            args.object_store_region.unwrap_or(env_region),
        )?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            object_store_endpoint: args
                .object_store_endpoint
                .or_else(|| env_opt("OBJECT_STORE_ENDPOINT")),
            object_store_bucket: args.object_store_bucket.unwrap_or(env_bucket),
            object_store_credentials,
            queue_name: args.queue_name.unwrap_or(env_queue),
            remote_timeout_ms: args.remote_timeout_ms.unwrap_or(env_timeout),
            retry_attempts: args.retry_attempts.unwrap_or(env_attempts),
            retry_base_backoff_ms: args.retry_base_backoff_ms.unwrap_or(env_backoff),
            reconcile_interval_secs: args.reconcile_interval_secs.unwrap_or(env_reconcile),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            max_entry_bytes: args.max_entry_bytes.unwrap_or(env_max_entry),
            max_extracted_bytes: args.max_extracted_bytes.unwrap_or(env_max_extracted),
        };

        if cfg.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be at least 1");
        }
        if cfg.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile_interval_secs must be at least 1");
        }
        if cfg.max_entry_bytes == 0 || cfg.max_extracted_bytes < cfg.max_entry_bytes {
            anyhow::bail!("max_extracted_bytes must be at least max_entry_bytes, which must be positive");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base_backoff = Duration::from_millis(self.retry_base_backoff_ms);
        RetryPolicy {
            attempts: self.retry_attempts,
            timeout: Duration::from_millis(self.remote_timeout_ms),
            base_backoff,
            max_backoff: base_backoff.saturating_mul(16),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_entry_bytes: self.max_entry_bytes,
            max_total_bytes: self.max_extracted_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win_over_defaults() {
        let cfg = AppConfig::merge(Args {
            port: Some(8088),
            object_store_endpoint: Some("http://127.0.0.1:9000".into()),
            retry_attempts: Some(5),
            retry_base_backoff_ms: Some(100),
            remote_timeout_ms: Some(2_000),
            ..Args::default()
        })
        .unwrap();

        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.object_store_endpoint.as_deref(), Some("http://127.0.0.1:9000"));

        let policy = cfg.retry_policy();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.timeout, Duration::from_secs(2));
        assert_eq!(policy.base_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_millis(1_600));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = AppConfig::merge(Args {
            retry_attempts: Some(0),
            ..Args::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("retry_attempts"));
    }

    #[test]
    fn extraction_limits_follow_cli() {
        let cfg = AppConfig::merge(Args {
            max_entry_bytes: Some(1_024),
            max_extracted_bytes: Some(4_096),
            ..Args::default()
        })
        .unwrap();
        assert_eq!(
            cfg.extraction_limits(),
            ExtractionLimits {
                max_entry_bytes: 1_024,
                max_total_bytes: 4_096,
            }
        );

        let err = AppConfig::merge(Args {
            max_entry_bytes: Some(4_096),
            max_extracted_bytes: Some(1_024),
            ..Args::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("max_extracted_bytes"));
    }

    #[test]
    fn key_pair_must_be_complete() {
        assert!(credentials(None, None, "us-east-1".into()).unwrap().is_none());
        let pair = credentials(Some("AKID".into()), Some("secret".into()), "ca-central-1".into())
            .unwrap()
            .unwrap();
        assert_eq!(pair.region, "ca-central-1");
        assert!(credentials(Some("AKID".into()), None, "us-east-1".into()).is_err());
        assert!(credentials(None, Some("secret".into()), "us-east-1".into()).is_err());
    }
}
