//! Failure taxonomy for a single source call, HTTP status classification,
//! and the shared retry-with-backoff combinator.
//!
//! Fetchers run their request sequence inside [`with_retry`] (or call it
//! once), then fold the final `Result<_, FetchError>` into a
//! [`FetchOutcome`](crate::db::FetchOutcome) so nothing escapes the fetcher.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Why a single request to an external source failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// HTTP 403 from a host that fingerprints automated traffic.
    #[error("access blocked (403)")]
    Blocked,
    /// HTTP 429.
    #[error("rate limited (429){}", fmt_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    /// Any other non-success status.
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    /// Body arrived but could not be decoded into the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl FetchError {
    /// Transient failures worth another attempt. 403s and parse failures are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Status(code) => *code >= 500,
            FetchError::Blocked | FetchError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Map a response status onto the failure taxonomy. `Ok(())` for 2xx.
pub fn check_response_status(resp: &reqwest::Response) -> Result<(), FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        403 => Err(FetchError::Blocked),
        429 => {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Err(FetchError::RateLimited { retry_after })
        }
        code => Err(FetchError::Status(code)),
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date form: use a conservative fixed wait instead of parsing the date
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Attempt budget and backoff base for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The wait between attempts doubles from
/// `policy.base_delay`; a longer server-supplied `Retry-After` wins.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    source: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let mut wait = policy.backoff(attempt);
                if let FetchError::RateLimited {
                    retry_after: Some(ra),
                } = e
                {
                    wait = wait.max(ra);
                }
                tracing::debug!(
                    source,
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fixed courtesy pause taken before each source's own requests.
pub async fn polite_pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
