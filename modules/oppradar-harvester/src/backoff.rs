//! Exponential backoff retry for transient failures.
//!
//! Retriability is the caller's call (source and persistence errors carry
//! their own taxonomy), so the predicate is injected rather than baked in.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first try.
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt plus
    /// up to half the base of random jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = if self.base.as_millis() >= 2 {
            rand::rng().random_range(0..(self.base.as_millis() as u64 / 2))
        } else {
            0
        };
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `operation`, retrying on errors the predicate accepts. The final
/// error is returned once retries are exhausted; non-retriable errors are
/// returned immediately without sleeping.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: RetryPolicy,
    is_retriable: P,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
