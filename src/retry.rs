// src/retry.rs
//! Bounded exponential-backoff retries around fallible async calls.

use backoff::future::retry;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::RetryPolicy;
use crate::error::{MediaError, StoreError};

/// Errors that know whether another attempt could succeed.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl Retryable for MediaError {
    fn is_transient(&self) -> bool {
        MediaError::is_transient(self)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Runs `op` until it succeeds, fails permanently, or `policy.max_retries`
/// retries have been spent. The last error is returned unchanged.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = AtomicU32::new(0);
    let max_retries = policy.max_retries;

    retry(policy.backoff(), || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    tracing::warn!(
                        operation = %label,
                        attempt = attempt + 1,
                        max_retries,
                        "🔁 transient failure, retrying: {}",
                        e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}
