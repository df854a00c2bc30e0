//! HTTP transport shared by the embedding and completion adapters.
//!
//! Every request goes through [`with_retry`], which retries transient
//! failures (rate limits, timeouts, connection drops, 5xx responses) with
//! exponential backoff and gives up immediately on permanent ones (bad
//! credentials, malformed responses).

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderSettings;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("provider connection failed: {message}")]
    Connection { message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Server { .. }
                | ProviderError::Connection { .. }
                | ProviderError::Timeout { .. }
        )
    }
}

/// Backoff policy for transient provider failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry
/// budget is spent. The last error is returned unchanged.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms,
                    error = %e,
                    "retrying after transient provider error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ProviderError) -> u64 {
    let computed = exponential_backoff(config, attempt);
    if let ProviderError::RateLimited { retry_after_secs } = err {
        return computed.max(retry_after_secs.saturating_mul(1000));
    }
    computed
}

fn exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64
        * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% on top of the capped value.
        capped + (capped as f64 * 0.25 * rand::random::<f64>()) as u64
    } else {
        capped
    }
}

/// Classify a non-success HTTP response.
pub fn map_http_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => {
            debug!(status, body = %body, "provider rejected credentials");
            ProviderError::AuthFailed {
                provider: "openai".to_string(),
            }
        }
        408 => ProviderError::Timeout { timeout_ms: 0 },
        429 => ProviderError::RateLimited {
            retry_after_secs: parse_retry_after(body).unwrap_or(5),
        },
        s if s >= 500 => ProviderError::Server {
            status: s,
            message: body.to_string(),
        },
        s => ProviderError::ApiRequest {
            message: format!("HTTP {s}: {body}"),
        },
    }
}

/// Pull the wait hint out of messages like "... try again in 7s".
fn parse_retry_after(body: &str) -> Option<u64> {
    let json: Value = serde_json::from_str(body).ok()?;
    let message = json.get("error")?.get("message")?.as_str()?;
    let tail = message.rsplit("in ").next()?;
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Thin client for OpenAI-compatible JSON endpoints.
///
/// A missing API key is not an error at construction time: requests fail
/// with a non-retryable [`ProviderError::AuthFailed`] instead, so commands
/// that never reach a provider keep working without credentials.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        let api_key = settings
            .api_key
            .clone()
            .or_else(|| std::env::var(&settings.api_key_env).ok())
            .filter(|key| !key.trim().is_empty());

        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            retry: settings.retry.clone(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// POST `body` to `{base_url}/{path}` with retries.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        with_retry(&self.retry, || self.post_once(path, body, timeout)).await
    }

    async fn post_once(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ProviderError::AuthFailed {
                provider: "openai".to_string(),
            });
        };

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(url = %url, "provider request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        if !status.is_success() {
            return Err(map_http_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::ResponseParse {
            message: e.to_string(),
        })
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::Connection {
            message: err.to_string(),
        }
    } else {
        ProviderError::ApiRequest {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let result =
            with_retry(&fast_retry(3), || async { Ok::<_, ProviderError>(7) })
                .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&fast_retry(3), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::AuthFailed {
                    provider: "openai".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&fast_retry(3), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&fast_retry(2), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout { timeout_ms: 10 })
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn http_errors_are_classified() {
        assert!(matches!(
            map_http_error(401, ""),
            ProviderError::AuthFailed { .. }
        ));
        assert!(matches!(
            map_http_error(503, "busy"),
            ProviderError::Server { status: 503, .. }
        ));
        assert!(matches!(
            map_http_error(400, "bad"),
            ProviderError::ApiRequest { .. }
        ));
        assert!(!map_http_error(400, "bad").is_retryable());
        assert!(map_http_error(502, "").is_retryable());
    }

    #[test]
    fn rate_limit_reads_retry_hint() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 7s."}}"#;
        match map_http_error(429, body) {
            ProviderError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 7)
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        match map_http_error(429, "not json") {
            ProviderError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 5)
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(exponential_backoff(&config, 0), 100);
        assert_eq!(exponential_backoff(&config, 1), 200);
        assert_eq!(exponential_backoff(&config, 3), 500);
    }

    #[test]
    fn rate_limit_backoff_respects_server_hint() {
        let config = fast_retry(1);
        let err = ProviderError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let settings = ProviderSettings {
            api_key: None,
            api_key_env: "GRANTFORGE_TEST_UNSET_KEY_VARIABLE".into(),
            ..ProviderSettings::default()
        };
        let client = OpenAiClient::new(&settings);
        assert!(!client.has_credentials());

        let result = client
            .post_json("embeddings", &serde_json::json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProviderError::AuthFailed { .. })));
    }
}
