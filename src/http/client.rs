use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::transport::Transport;

/// Statuses worth another attempt; anything else non-2xx is final.
pub const RETRYABLE_STATUSES: [u16; 6] = [429, 500, 501, 502, 503, 504];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: gave up after {attempts} attempts ({last})")]
    Transient {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("{url}: http {status}")]
    Permanent { url: String, status: u16 },
    #[error("{url}: undecodable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (1-based): base * 2^(retry-1).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

/// Timeout/retry/backoff wrapper shared by every feed fetcher. Calls are independent:
/// no state carries over from one `fetch_json` to the next.
pub struct ResilientClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last = match self.transport.get(url, query).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    return serde_json::from_str(&resp.body).map_err(|source| FetchError::Decode {
                        url: url.to_string(),
                        source,
                    });
                }
                Ok(resp) if RETRYABLE_STATUSES.contains(&resp.status) => {
                    format!("http {}", resp.status)
                }
                Ok(resp) => {
                    debug!(url, status = resp.status, "non-retryable status");
                    return Err(FetchError::Permanent {
                        url: url.to_string(),
                        status: resp.status,
                    });
                }
                Err(err) => err.to_string(),
            };
            if attempt > self.policy.max_retries {
                warn!(url, attempts = attempt, last = %last, "retries exhausted");
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    attempts: attempt,
                    last,
                });
            }
            let delay = self.policy.delay(attempt);
            debug!(url, attempt, delay_ms = delay.as_millis() as u64, last = %last, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
