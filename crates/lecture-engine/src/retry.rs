// Retry policy table and the shared retry-with-backoff loop.
//
// Every call site that retries consults the same table keyed by `ErrorKind`,
// so bounds are configured in one place.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ErrorKind, LectureError};

/// Backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt is computed with a checked shift so attempts >= 32 saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter is limited so the final delay never exceeds `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Maximum attempts per failure kind, plus the backoff used between
/// transfer attempts.
#[derive(Debug, Clone)]
pub struct RetryTable {
    attempts: HashMap<ErrorKind, u32>,
    pub backoff: RetryPolicy,
}

impl Default for RetryTable {
    fn default() -> Self {
        let attempts = HashMap::from([
            (ErrorKind::RenderTimeout, 5),
            (ErrorKind::StaleContent, 5),
            (ErrorKind::TransferError, 3),
        ]);
        Self {
            attempts,
            backoff: RetryPolicy::default(),
        }
    }
}

impl RetryTable {
    /// Total attempts allowed for `kind`, including the first. Never zero.
    pub fn max_attempts(&self, kind: ErrorKind) -> u32 {
        self.attempts.get(&kind).copied().unwrap_or(1).max(1)
    }

    pub fn set_max_attempts(&mut self, kind: ErrorKind, attempts: u32) {
        self.attempts.insert(kind, attempts.max(1));
    }

    /// Backoff policy bounded by the table entry for `kind`.
    pub fn policy_for(&self, kind: ErrorKind) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_attempts(kind) - 1,
            ..self.backoff.clone()
        }
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure (network, 5xx, timeout).
    Retry(LectureError),
    /// Permanent failure (4xx, parse error).
    Fail(LectureError),
}

impl<T> RetryAction<T> {
    /// Sorts a result by the error's own retryability.
    pub fn from_result(result: Result<T, LectureError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) if e.is_retryable() => Self::Retry(e),
            Err(e) => Self::Fail(e),
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, LectureError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(LectureError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) if attempt >= policy.max_retries => return Err(err),
            RetryAction::Retry(err) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(LectureError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        attempt += 1;
    }
}
