//! Retry classification and log message formatting for the HTTP layer.
//!
//! Every failed attempt is classified into a [`RetryErrorType`], which decides
//! whether the request is retried, fails immediately, or trips the client's
//! ban flag. [`RetryContext`] renders consistent log lines for each outcome.

use chrono::{DateTime, Utc};
use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

use crate::Platform;

/// Classification of a failed request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 403/418, the exchange is refusing this client
    Banned(u16),
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 invalid request / bad symbol
    InvalidRequest,
    /// Authentication failure (401)
    AuthFailed,
    /// Other client errors (4xx)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::Banned(418) => "IP banned (418)",
            Self::Banned(_) => "access forbidden (403)",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed => "authentication failed (401)",
            Self::ClientError(code) => match code {
                404 => "resource not found",
                451 => "unavailable due to restrictions",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation shown with final failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower the platform's rate budget or concurrency",
            Self::Banned(_) => "Stop all runs for this platform and wait for the ban to expire",
            Self::ServerError(_) => "Exchange may be experiencing issues, try again later",
            Self::InvalidRequest => "Check the symbol is still listed on the exchange",
            Self::AuthFailed => "Public market data should not need credentials; check the base URL",
            Self::ClientError(_) => "Review request parameters against the exchange API docs",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the same request may be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetryErrorType::NetworkTimeout
                | RetryErrorType::NetworkOffline
                | RetryErrorType::RateLimit
                | RetryErrorType::ServerError(_)
                | RetryErrorType::NetworkGeneric
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Platform being queried
    pub platform: Platform,
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Request window for context (start, end) in millis
    pub window: Option<(i64, i64)>,
    /// Original error message for details
    pub error_message: String,
    /// Endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Create a context for one failed attempt.
    pub fn new(
        platform: Platform,
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            attempt,
            max_attempts,
            error_type,
            backoff_duration: Duration::ZERO,
            window: None,
            error_message: String::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Set the backoff before the next attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    /// Set the underlying error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Set the request window.
    pub fn with_window(mut self, start: i64, end: i64) -> Self {
        self.window = Some((start, end));
        self
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "[{}] Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.platform,
            self.endpoint,
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_window(&mut message, self.window);
        message
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![format!(
            "[{}] Request failed after {} attempts",
            self.platform, self.attempt
        )];
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        if let Some((start, end)) = self.window {
            lines.push(format!(
                "  Window: {} to {}",
                format_timestamp(start),
                format_timestamp(end)
            ));
        }
        lines.push(format!("  Suggestion: {}", self.error_type.suggestion()));
        lines.join("\n")
    }
}

/// Classify an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return RetryErrorType::InvalidRequest,
            401 => return RetryErrorType::AuthFailed,
            403 | 418 => return RetryErrorType::Banned(status.as_u16()),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

fn append_window(buffer: &mut String, window: Option<(i64, i64)>) {
    if let Some((start, end)) = window {
        buffer.push_str(&format!(
            " ({} to {})",
            format_timestamp(start),
            format_timestamp(end)
        ));
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
