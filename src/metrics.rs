//! Production observability metrics for the ingestion pipeline
//!
//! This module provides metrics collection for monitoring throttling, bans,
//! retry behavior, rate limiter health and per-platform ingestion throughput.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (`--metrics-addr`)
//! - Recording is a no-op until [`init_metrics`] installs a recorder

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::Platform;

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// This should be called once at application startup, typically in main().
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to exchange APIs"
    );

    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit errors received"
    );

    describe_counter!(
        "http_bans_total",
        Unit::Count,
        "Total number of ban responses (403/418) received"
    );

    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "rate_limit_permits_acquired_total",
        Unit::Count,
        "Total number of token bucket acquisitions"
    );

    describe_gauge!(
        "rate_limit_permits_available",
        Unit::Count,
        "Tokens available in the bucket after the last immediate acquisition"
    );

    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate limit tokens"
    );

    describe_counter!(
        "ingest_points_stored_total",
        Unit::Count,
        "Total number of points written to storage"
    );

    describe_counter!(
        "ingest_symbol_failures_total",
        Unit::Count,
        "Total number of per-symbol fetch or store failures"
    );

    describe_counter!(
        "ingest_runs_total",
        Unit::Count,
        "Total number of finished ingestion runs by outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    platform: Platform,
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(platform: Platform, endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            platform = %platform,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting HTTP request metrics"
        );

        Self {
            platform,
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "platform" => self.platform.as_str(),
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "platform" => self.platform.as_str(),
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        match status_code {
            429 => {
                counter!(
                    "http_429_errors_total",
                    "platform" => self.platform.as_str(),
                    "endpoint" => self.endpoint.clone(),
                )
                .increment(1);

                warn!(
                    correlation_id = %self.correlation_id,
                    platform = %self.platform,
                    endpoint = %self.endpoint,
                    attempt = self.attempt,
                    duration_ms = duration.as_millis(),
                    "Rate limit error (429) recorded"
                );
            }
            403 | 418 => {
                counter!(
                    "http_bans_total",
                    "platform" => self.platform.as_str(),
                    "status" => status_code.to_string(),
                )
                .increment(1);
            }
            _ => {}
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "platform" => self.platform.as_str(),
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "platform" => self.platform.as_str(),
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl Default for RateLimiterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterMetrics {
    /// Create a new rate limiter metrics instance
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record successful token acquisition
    pub fn record_acquired(&mut self, weight: u32) {
        if let Some(start) = self.start_time.take() {
            let wait_duration = start.elapsed();

            histogram!("rate_limit_queue_wait_seconds").record(wait_duration.as_secs_f64());

            counter!(
                "rate_limit_permits_acquired_total",
                "weight" => weight.to_string(),
            )
            .increment(1);

            if wait_duration.as_millis() > 100 {
                debug!(
                    weight = weight,
                    wait_ms = wait_duration.as_millis(),
                    "Rate limit tokens acquired after wait"
                );
            }
        }
    }

    /// Update available tokens gauge
    pub fn update_available_permits(&self, available: f64) {
        gauge!("rate_limit_permits_available").set(available);
    }
}

/// Per-dataset ingestion counters for one platform
#[derive(Debug, Clone, Copy)]
pub struct IngestMetrics {
    platform: Platform,
}

impl IngestMetrics {
    /// Metrics handle for a platform
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Record points written for a dataset
    pub fn record_stored(&self, dataset: &'static str, count: usize) {
        counter!(
            "ingest_points_stored_total",
            "platform" => self.platform.as_str(),
            "dataset" => dataset,
        )
        .increment(count as u64);
    }

    /// Record a per-symbol failure for a dataset
    pub fn record_symbol_failure(&self, dataset: &'static str) {
        counter!(
            "ingest_symbol_failures_total",
            "platform" => self.platform.as_str(),
            "dataset" => dataset,
        )
        .increment(1);
    }

    /// Record a finished run
    pub fn record_run(&self, kind: &'static str, status: &'static str, duration: Duration) {
        counter!(
            "ingest_runs_total",
            "platform" => self.platform.as_str(),
            "kind" => kind,
            "status" => status,
        )
        .increment(1);

        info!(
            platform = %self.platform,
            kind = kind,
            status = status,
            duration_secs = duration.as_secs(),
            "Ingestion run recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_generation() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();

        assert_ne!(id1, id2);
        assert!(id1.starts_with("req-"));
        assert!(id2.starts_with("req-"));
    }

    #[tokio::test]
    async fn test_http_request_metrics_lifecycle() {
        let metrics = HttpRequestMetrics::start(Platform::Bybit, "/v5/market/kline", 1);
        assert!(!metrics.correlation_id().is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;

        metrics.record_complete(200);
        metrics.record_complete(418);
    }

    #[test]
    fn test_rate_limiter_metrics() {
        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();
        metrics.record_acquired(5);
        metrics.update_available_permits(95.0);
    }

    #[test]
    fn test_ingest_metrics_without_recorder() {
        let metrics = IngestMetrics::new(Platform::Okx);
        metrics.record_stored("funding", 42);
        metrics.record_symbol_failure("ohlcv");
        metrics.record_run("initial", "partial", Duration::from_secs(3));
    }
}
