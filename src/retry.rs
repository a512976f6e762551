use crate::error::{CrawlerError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ±20% so parallel fetchers do not retry in lockstep
const JITTER: f64 = 0.2;

/// Ceiling for any single wait, including a server's `Retry-After`.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Timeout and bounded exponential backoff applied to every network-bound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`. A server-provided delay wins;
    /// either is capped at [`MAX_BACKOFF`].
    pub fn backoff_for(&self, attempt: u32, error: &CrawlerError) -> Duration {
        if let Some(after) = error.retry_after() {
            return after.min(MAX_BACKOFF);
        }
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.backoff_base.saturating_mul(exp).min(MAX_BACKOFF);
        let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
        base.mul_f64(1.0 + jitter).min(MAX_BACKOFF)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out. Cancellation is checked before every attempt and while
/// backing off.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CrawlerError::Cancelled);
        }
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CrawlerError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt, &e);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    operation, attempt, max_attempts, e, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CrawlerError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
