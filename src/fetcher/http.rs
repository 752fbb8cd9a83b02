//! Exchange HTTP client
//!
//! Provides one HTTP client per platform with:
//! - GET (query string) and POST (JSON body) requests
//! - Token bucket weight consumed before every attempt
//! - Retry with exponential backoff on 429, 5xx and network errors
//! - A ban flag set on 403/418 that short-circuits every later request until
//!   [`ExchangeHttpClient::reset_ban`] clears it at the start of the next run

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::fetcher::retry::{extract_error_type, RetryContext, RetryErrorType};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::ingest::config::RetryPolicy;
use crate::ingest::rate_limit::TokenBucketLimiter;
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::Platform;

/// HTTP method of an [`ApiRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Query-string request
    Get,
    /// JSON body request
    Post,
}

/// One exchange API call, independent of the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Path appended to the client's base URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(&'static str, String)>,
    /// JSON body (POST only)
    pub body: Option<Value>,
    /// Token bucket weight of the call
    pub weight: u32,
}

impl ApiRequest {
    /// GET request with weight 1
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            weight: 1,
        }
    }

    /// POST request with a JSON body and weight 1
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            weight: 1,
        }
    }

    /// Append a query parameter
    pub fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    /// Append a query parameter when `value` is set
    pub fn param_opt(self, key: &'static str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// Set the token bucket weight
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Query value for `key`, if present
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client bound to one platform's base URL and rate budget
pub struct ExchangeHttpClient {
    platform: Platform,
    client: Arc<Client>,
    base_url: String,
    limiter: TokenBucketLimiter,
    retry: RetryPolicy,
    // 0 while not banned, otherwise the status that triggered the ban
    ban_status: AtomicU16,
}

impl ExchangeHttpClient {
    /// Create new HTTP client
    ///
    /// # Arguments
    /// * `platform` - Platform served, used for logs and metrics labels
    /// * `client` - Shared HTTP client (Arc for cheap cloning)
    /// * `base_url` - Base URL for API endpoints (e.g., "<https://api.bybit.com>")
    /// * `limiter` - The platform's shared token bucket
    /// * `retry` - Retry ceiling and backoff policy
    pub fn new(
        platform: Platform,
        client: Arc<Client>,
        base_url: impl Into<String>,
        limiter: TokenBucketLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            platform,
            client,
            base_url: base_url.into(),
            limiter,
            retry,
            ban_status: AtomicU16::new(0),
        }
    }

    /// Base URL for API endpoints
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a ban response has been received
    pub fn is_banned(&self) -> bool {
        self.ban_status.load(Ordering::SeqCst) != 0
    }

    /// Clear the ban flag so a new run may reach the exchange again
    pub fn reset_ban(&self) {
        let previous = self.ban_status.swap(0, Ordering::SeqCst);
        if previous != 0 {
            info!(
                platform = %self.platform,
                status = previous,
                "Clearing ban flag from previous run"
            );
        }
    }

    fn banned_error(&self) -> Option<FetcherError> {
        match self.ban_status.load(Ordering::SeqCst) {
            0 => None,
            status => Some(FetcherError::Banned { status }),
        }
    }

    fn trip_ban(&self, status: u16) {
        if self
            .ban_status
            .compare_exchange(0, status, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!(
                platform = %self.platform,
                status,
                "Exchange ban signal received, halting requests for the rest of the run"
            );
        }
    }

    /// Execute a request and deserialize the JSON response
    ///
    /// # Errors
    /// - [`FetcherError::Banned`] on 403/418, and for every call after one
    /// - [`FetcherError::RateLimitExceeded`] when 429 persists past the retry ceiling
    /// - [`FetcherError::HttpError`] on other client errors (not retried) or exhausted 5xx
    /// - [`FetcherError::ParseError`] when the body does not match `T`
    pub async fn execute<T>(&self, request: &ApiRequest) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, request.path);
        let max_attempts = self.retry.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if let Some(banned) = self.banned_error() {
                return Err(banned);
            }

            self.limiter.consume(request.weight).await?;

            let metrics = HttpRequestMetrics::start(self.platform, request.path.clone(), attempt + 1);
            let builder = match request.method {
                HttpMethod::Get => self.client.get(&url).query(&request.query),
                HttpMethod::Post => self
                    .client
                    .post(&url)
                    .query(&request.query)
                    .json(request.body.as_ref().unwrap_or(&Value::Null)),
            };

            debug!(
                platform = %self.platform,
                url = %url,
                params = request.query.len(),
                attempt = attempt + 1,
                "Sending request"
            );

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    metrics.record_network_error();
                    let kind = extract_error_type(None, Some(&e));
                    last_error = Some(FetcherError::NetworkError(e.to_string()));
                    if attempt < self.retry.max_retries {
                        self.backoff(request, attempt, max_attempts, kind, &e.to_string(), None)
                            .await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            metrics.record_complete(status.as_u16());

            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    FetcherError::ParseError(format!("Failed to deserialize response: {e}"))
                });
            }

            let kind = extract_error_type(Some(status), None);
            match kind {
                RetryErrorType::Banned(code) => {
                    self.trip_ban(code);
                    return Err(FetcherError::Banned { status: code });
                }
                kind if kind.is_retryable() => {
                    last_error = Some(match kind {
                        RetryErrorType::RateLimit => FetcherError::RateLimitExceeded,
                        _ => FetcherError::HttpError(format!("Server error: {status}")),
                    });
                    if attempt < self.retry.max_retries {
                        let retry_after = parse_retry_after(response.headers());
                        self.backoff(
                            request,
                            attempt,
                            max_attempts,
                            kind,
                            &status.to_string(),
                            retry_after,
                        )
                        .await;
                        continue;
                    }
                    break;
                }
                _ => {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(FetcherError::HttpError(format!(
                        "Client error {status}: {error_text}"
                    )));
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| FetcherError::NetworkError("All retries exhausted".to_string()));
        let kind = match &error {
            FetcherError::RateLimitExceeded => RetryErrorType::RateLimit,
            FetcherError::NetworkError(_) => RetryErrorType::NetworkGeneric,
            _ => RetryErrorType::ServerError(500),
        };
        warn!(
            "{}",
            RetryContext::new(self.platform, max_attempts, max_attempts, kind, &request.path)
                .with_error(error.to_string())
                .format_failure()
        );
        Err(error)
    }

    async fn backoff(
        &self,
        request: &ApiRequest,
        attempt: u32,
        max_attempts: u32,
        kind: RetryErrorType,
        message: &str,
        retry_after: Option<Duration>,
    ) {
        let mut delay = self.retry.backoff(attempt);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after.min(self.retry.max_delay));
        }

        warn!(
            "{}",
            RetryContext::new(self.platform, attempt + 1, max_attempts, kind, &request.path)
                .with_backoff(delay)
                .with_error(message)
                .format_retry()
        );
        record_retry_backoff(delay, attempt + 1);
        tokio::time::sleep(delay).await;
    }
}

/// Parse a `Retry-After` header given in whole seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    match value.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            debug!("Ignoring non-numeric Retry-After '{}': {}", value, e);
            None
        }
    }
}
