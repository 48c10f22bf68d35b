use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio_util::sync::CancellationToken;

use super::error::AscError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Log every retry at warn level instead of debug.
    pub log_retries: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            log_retries: false,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the wait before retry number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered wait, uniform in `[ceiling / 2, ceiling]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let floor = ceiling / 2;
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }

    /// Wait before the next attempt, preferring the server's hint.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }

    pub(crate) fn log_retry(&self, attempt: u32, delay: Duration, reason: &str) {
        if self.log_retries {
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying: {}",
                reason
            );
        } else {
            tracing::debug!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying: {}",
                reason
            );
        }
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Sleeps for `delay` unless the token fires first. Returns false when
/// cancelled.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of retries.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AscError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AscError>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(AscError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt, err.retry_after());
                policy.log_retry(attempt, delay, &err.to_string());
                if !sleep_or_cancel(cancel, delay).await {
                    return Err(AscError::Cancelled);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
