//! Timeout and retry guard for calls that leave the process.
//!
//! Every attempt runs under its own deadline. Failed or timed-out attempts
//! are retried with exponential backoff until the attempt budget is spent;
//! the last failure is returned with its cause attached.

use std::{error::Error as StdError, future::Future, time::Duration};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Deadline for a single attempt.
    pub timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(30),
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{operation} timed out after {attempts} attempt(s) of {timeout:?}")]
    TimedOut {
        operation: &'static str,
        attempts: u32,
        timeout: Duration,
    },
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Run `call` under `policy`, retrying failures and timeouts.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + Send + Sync + 'static,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.base_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                warn!(operation, attempt, error = %err, "remote call failed");
                RemoteError::Failed {
                    operation,
                    attempts: attempt,
                    source: Box::new(err),
                }
            }
            Err(_) => {
                warn!(operation, attempt, timeout = ?policy.timeout, "remote call timed out");
                RemoteError::TimedOut {
                    operation,
                    attempts: attempt,
                    timeout: policy.timeout,
                }
            }
        };

        if attempt >= attempts {
            return Err(err);
        }
        tokio::time::sleep(backoff).await;
        backoff = backoff.saturating_mul(2).min(policy.max_backoff);
    }
}
