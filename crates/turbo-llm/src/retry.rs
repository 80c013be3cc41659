//! When and how long to wait before re-sending a chat request.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use turbo_core::LlmConfig;

/// Longest server-requested wait that is honoured as is.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first; 0 disables retries.
    pub max_retries: u8,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base: Duration::from_millis(cfg.retry_base_ms),
        }
    }

    /// Whether another request may follow failed attempt number `attempt`
    /// (0-based).
    pub fn allows(&self, attempt: u8) -> bool {
        attempt < self.max_retries
    }

    /// A server-provided wait wins; otherwise the base doubles per attempt.
    pub fn delay(&self, attempt: u8, server_wait: Option<Duration>) -> Duration {
        if let Some(wait) = server_wait {
            return wait.min(MAX_RETRY_AFTER);
        }
        let factor = 1_u32.checked_shl(u32::from(attempt)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

pub(crate) fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `Retry-After` as delta seconds or an HTTP date.
pub(crate) fn server_wait(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let seconds = at.signed_duration_since(Utc::now()).num_seconds().max(0);
    Some(Duration::from_secs(seconds.unsigned_abs()))
}
