use std::future::Future;

use log::debug;

use crate::config::{STORAGE_RETRY_ATTEMPTS, STORAGE_RETRY_BACKOFF};
use crate::core::error::ChainError;

/// Re-runs a storage operation on transient failures with doubling
/// backoff. Deterministic chain errors and cancellation surface
/// immediately.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut delay = STORAGE_RETRY_BACKOFF;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_deterministic() || matches!(err, ChainError::Cancelled) => {
                return Err(err)
            }
            Err(err) => {
                attempt += 1;
                if attempt >= STORAGE_RETRY_ATTEMPTS {
                    return Err(err);
                }
                debug!(
                    "storage operation failed (attempt {}/{}): {}",
                    attempt, STORAGE_RETRY_ATTEMPTS, err
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
    }
}
