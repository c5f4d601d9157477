//! Utility functions for minielect

use crate::common::config::{ElectionConfig, RetryPolicy};
use crate::common::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Parse duration string (e.g., "500ms", "7s", "5m", "1h", "1d")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = match s.strip_suffix("ms") {
        Some(num) => (num, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    num.checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidConfig(format!("duration out of range: {}", s)))
}

/// Run a remote call under a deadline.
///
/// An elapsed deadline means the service did not answer, not that the
/// session is gone, so it maps to `CoordinationUnavailable`.
pub async fn with_timeout<T, Fut>(timeout: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::CoordinationUnavailable(format!(
            "{} timed out after {:?}",
            what, timeout
        ))),
    }
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, what: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.backoff();

    for attempt in 0..max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_attempts - 1 => {
                tracing::warn!(
                    "{} attempt {} failed: {}, retrying in {:?}",
                    what,
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff());
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Internal(format!("{}: max retries exceeded", what)))
}

/// Deadline plus retry policy applied to every remote call of one peer
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CallPolicy {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    pub fn from_config(config: &ElectionConfig) -> Self {
        Self::new(config.operation_timeout(), config.retry)
    }

    /// Each attempt gets its own deadline; transient failures are retried.
    pub async fn run<F, Fut, T>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.retry, what, || with_timeout(self.timeout, what, f())).await
    }
}
