//! Retry with exponential backoff
//!
//! One wrapper shared by every client. The caller supplies the operation and a
//! classification function deciding whether a given error is worth retrying.
//!
//! **Backoff Strategy:**
//! - First delay: `initial_backoff`
//! - Multiplier: 2.0 (exponential), capped at `max_backoff`
//! - Server-specified delays (`Retry-After`) replace the computed delay
//!
//! **Classification for client errors:**
//! - Connection failures and 5xx: retried
//! - 429: retried, honoring `Retry-After` when present
//! - Auth, schema and other 4xx: returned immediately

use crate::error::ClientError;
use arrem_common::config::RetrySettings;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Upper bound on a server-specified delay
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the standard backoff
    Retry,
    /// Retry after the given delay
    RetryAfter(Duration),
    /// Give up and return the error
    Fail,
}

/// Attempt budget and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1 = first retry)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, `classify` says stop, or attempts run out
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    classify: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: Display,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let delay = match classify(&err) {
                    RetryDecision::Fail => return Err(err),
                    RetryDecision::Retry => policy.backoff_for(attempt),
                    RetryDecision::RetryAfter(requested) => requested.min(MAX_RETRY_AFTER),
                };

                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Giving up: retry attempts exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Standard classification for [`ClientError`]
pub fn classify_client_error(err: &ClientError) -> RetryDecision {
    match err {
        ClientError::Connection(_) | ClientError::Server { .. } => RetryDecision::Retry,
        ClientError::RateLimited {
            retry_after: Some(delay),
        } => RetryDecision::RetryAfter(*delay),
        ClientError::RateLimited { retry_after: None } => RetryDecision::Retry,
        ClientError::Auth { .. } | ClientError::Schema(_) | ClientError::Client { .. } => {
            RetryDecision::Fail
        }
    }
}

/// Parse a `Retry-After` header. Only the delta-seconds form is supported.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    header_value
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
