use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::state::{InMemoryState, NotKeyed};
use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::types::chain::{
    unwrap_result, BlockResponse, BlockResultsResponse, ChainStatus, StatusResponse,
};
use crate::types::config::SourceConfig;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse RPC response: {0}")]
    Parse(String),

    #[error("Unexpected RPC response shape: {0}")]
    InvalidResponse(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl RpcError {
    /// Transient failures worth retrying: 5xx, 429, connect/read timeouts,
    /// aborted connections. Other HTTP errors and parse failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

/// Retry policy: `backoff_ms × 2^attempt × (1 ± jitter)` between attempts,
/// up to `retries` retries after the initial try.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub retries: u32,
    pub backoff_ms: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 250,
            jitter: 0.3,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-indexed), jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff_ms.saturating_mul(1u64 << attempt.min(16)) as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((base * factor).max(0.0) as u64)
    }
}

/// Execute an operation with retry on transient errors.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        "RPC '{}' succeeded after {} retries",
                        operation_name,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.retries => {
                let delay = config.delay_for_attempt(attempt);
                attempt += 1;
                tracing::warn!(
                    "RPC '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name,
                    attempt,
                    config.retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

type DirectRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

/// Token-bucket capacity: twice the refill rate, rounded up.
pub fn burst_capacity(rps: u32) -> u32 {
    rps.saturating_mul(2)
}

/// CometBFT RPC client: HTTP GET JSON endpoints behind a process-local
/// token bucket, with bounded retries per call.
pub struct CometClient {
    http: reqwest::Client,
    base_url: Url,
    limiter: Arc<DirectRateLimiter>,
    retry: RetryConfig,
}

impl CometClient {
    pub fn new(config: &SourceConfig) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RpcError::Build(e.to_string()))?;

        let rps = NonZeroU32::new(config.rps).expect("rps validated at config load");
        let burst = NonZeroU32::new(burst_capacity(config.rps))
            .expect("burst is at least rps");
        let limiter = RateLimiter::direct(Quota::per_second(rps).allow_burst(burst));

        Ok(Self {
            http,
            base_url: config.rpc_url.clone(),
            limiter: Arc::new(limiter),
            retry: RetryConfig {
                retries: config.retries,
                backoff_ms: config.backoff_ms,
                jitter: config.backoff_jitter,
            },
        })
    }

    pub async fn status(&self) -> Result<ChainStatus, RpcError> {
        let value = self.get_json("status", &[]).await?;
        let parsed: StatusResponse = serde_json::from_value(value)
            .map_err(|e| RpcError::Parse(format!("status: {}", e)))?;
        let earliest = parsed
            .sync_info
            .earliest_block_height
            .parse::<u64>()
            .map_err(|_| {
                RpcError::InvalidResponse(format!(
                    "earliest_block_height '{}' is not a decimal integer",
                    parsed.sync_info.earliest_block_height
                ))
            })?;
        let latest = parsed
            .sync_info
            .latest_block_height
            .parse::<u64>()
            .map_err(|_| {
                RpcError::InvalidResponse(format!(
                    "latest_block_height '{}' is not a decimal integer",
                    parsed.sync_info.latest_block_height
                ))
            })?;
        Ok(ChainStatus {
            earliest_block_height: earliest,
            latest_block_height: latest,
        })
    }

    pub async fn block(&self, height: u64) -> Result<BlockResponse, RpcError> {
        let value = self
            .get_json("block", &[("height", height.to_string())])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Parse(format!("block {}: {}", height, e)))
    }

    pub async fn block_results(&self, height: u64) -> Result<BlockResultsResponse, RpcError> {
        let value = self
            .get_json("block_results", &[("height", height.to_string())])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Parse(format!("block_results {}: {}", height, e)))
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, RpcError> {
        let operation = format!("{}{}", path, fmt_query(query));
        with_retry(&self.retry, &operation, || async {
            self.limiter.until_ready().await;
            self.get_once(path, query).await
        })
        .await
    }

    async fn get_once(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, RpcError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| RpcError::InvalidResponse(format!("bad path '{}': {}", path, e)))?;

        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = truncated_body(response).await;
            return Err(RpcError::Transport(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Parse(e.to_string()))?;
        Ok(unwrap_result(value))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> RpcError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RpcError::Transport(e.to_string())
    } else if e.is_decode() {
        RpcError::Parse(e.to_string())
    } else {
        RpcError::Transport(e.to_string())
    }
}

async fn truncated_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let mut body = body.replace('\n', " ");
    body.truncate(200);
    body
}

fn fmt_query(query: &[(&str, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("?{}={}", k, v))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retryable_classification() {
        assert!(RpcError::Transport("HTTP 503".to_string()).is_retryable());
        assert!(!RpcError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!RpcError::Parse("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let config = RetryConfig {
            retries: 3,
            backoff_ms: 100,
            jitter: 0.3,
        };
        for attempt in 0..4 {
            let base = 100u64 * (1 << attempt);
            let delay = config.delay_for_attempt(attempt).as_millis() as u64;
            assert!(delay >= (base as f64 * 0.69) as u64, "attempt {}", attempt);
            assert!(delay <= (base as f64 * 1.31) as u64, "attempt {}", attempt);
        }
    }

    #[test]
    fn test_burst_capacity() {
        assert_eq!(burst_capacity(150), 300);
        assert_eq!(burst_capacity(1), 2);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let config = RetryConfig {
            retries: 3,
            backoff_ms: 1,
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&config, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RpcError::Transport("HTTP 503".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_non_retryable() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Parse("nope".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RpcError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_budget() {
        let config = RetryConfig {
            retries: 2,
            backoff_ms: 1,
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Transport("HTTP 502".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
