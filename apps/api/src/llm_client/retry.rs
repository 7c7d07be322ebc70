//! Generic retry-with-backoff used by the LLM client.
//!
//! The caller classifies each error: stop, retry on the exponential schedule, or
//! retry after a provider-supplied delay. Backoff sleeps race the cancellation
//! token so an abort never waits out a delay.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Marker returned through `E: From<Cancelled>` when the token fires mid-retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Backoff after the given failed attempt (1-based): base, base*2, base*4, ... capped.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    Retry,
    RetryAfter(Duration),
}

/// Runs `op` until it succeeds, `classify` says stop, attempts run out, or
/// `cancel` fires during a backoff sleep.
pub async fn retry_with_backoff<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    classify: C,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: From<Cancelled> + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = match classify(&error) {
            RetryDecision::Stop => return Err(error),
            RetryDecision::Retry => policy.delay_for(attempt),
            RetryDecision::RetryAfter(hint) => hint.min(policy.max_delay),
        };

        if attempt >= max_attempts {
            return Err(error);
        }

        warn!(
            "Attempt {}/{} failed: {}. Retrying in {}ms",
            attempt,
            max_attempts,
            error,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(E::from(Cancelled)),
            () = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
