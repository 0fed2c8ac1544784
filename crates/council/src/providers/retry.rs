use std::future::Future;
use std::time::Duration;

use super::errors::ProviderError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(1000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry a provider call with exponential backoff.
///
/// Only errors classified as retryable (rate limit, network, 5xx) are
/// retried; a rate-limit `retry-after` hint overrides the computed delay.
pub async fn with_backoff<F, Fut, T>(operation_name: &str, f: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = BASE_DELAY;

    for attempt in 1..=MAX_ATTEMPTS {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let wait = err.retry_delay().unwrap_or(delay).min(MAX_DELAY);
                tracing::warn!(
                    "{} failed ({}), retrying in {:?} (attempt {}/{})",
                    operation_name,
                    err.kind(),
                    wait,
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns")
}
