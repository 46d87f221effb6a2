use std::future::Future;
use std::time::Duration;

use super::traits::FetchFailure;

/// Exponential backoff for fetcher calls.
///
/// Attempt `n` (1-based) that fails with [`FetchFailure::RateLimited`] or
/// [`FetchFailure::Transient`] waits `base_delay * 2^(n-1)` before the next
/// one. `NotFound` is final immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Returns the last failure.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry_count + 1 < self.max_attempts => {
                    let delay = self.delay_for(retry_count);
                    tracing::warn!(
                        target_url = %what,
                        error = %e,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
