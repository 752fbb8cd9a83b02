//! Ingestion configuration constants and runtime settings

use std::time::Duration;

/// Maximum number of retries for throttled or failed requests.
/// 5 retries with exponential backoff rides out a typical rate limit window
/// without stalling a pipeline for more than about a minute.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Floor for the limiter re-evaluation timer, avoids busy-looping on tiny deficits.
pub const MIN_LIMITER_WAIT_MS: u64 = 10;

/// Courtesy delay between pagination requests, independent of the token budget.
pub const INTER_PAGE_DELAY_MS: u64 = 100;

/// Upper bound on pages walked for a single symbol.
pub const MAX_PAGES: usize = 10_000;

/// Default history horizon for initial runs.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// Per-subscriber progress channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a terminal event waits on a full subscriber channel.
pub const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Calculate exponential backoff delay with the default base and cap
pub fn calculate_backoff(retry_count: u32) -> Duration {
    RetryPolicy::default().backoff(retry_count)
}

/// Retry policy applied by the HTTP layer on throttling and transient errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled per attempt
    pub base_delay: Duration,
    /// Cap on a single backoff delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retry number `retry_count` (0-based)
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            MAX_RETRIES,
            Duration::from_millis(INITIAL_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
        )
    }
}

/// Runtime settings shared by every orchestrator built from one registry
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// History horizon for initial runs, in days
    pub lookback_days: u32,
    /// HTTP retry policy
    pub retry: RetryPolicy,
    /// Courtesy delay between pagination requests
    pub inter_page_delay: Duration,
    /// Per-subscriber progress channel capacity
    pub event_buffer: usize,
    /// Whether hourly platforms run the resample stage
    pub resample: bool,
}

impl IngestConfig {
    /// Set the lookback horizon
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the inter-page delay
    pub fn with_inter_page_delay(mut self, delay: Duration) -> Self {
        self.inter_page_delay = delay;
        self
    }

    /// Set the per-subscriber event buffer
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Enable or disable resampling
    pub fn with_resample(mut self, resample: bool) -> Self {
        self.resample = resample;
        self
    }

    /// Lookback horizon in milliseconds
    pub fn lookback_ms(&self) -> i64 {
        i64::from(self.lookback_days) * 24 * crate::HOUR_MS
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            retry: RetryPolicy::default(),
            inter_page_delay: Duration::from_millis(INTER_PAGE_DELAY_MS),
            event_buffer: EVENT_CHANNEL_CAPACITY,
            resample: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(3), Duration::from_millis(8000));
        assert_eq!(calculate_backoff(4), Duration::from_millis(16000));
        // Should cap at MAX_BACKOFF_MS
        assert_eq!(calculate_backoff(10), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(calculate_backoff(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_custom_policy_doubles_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(100));
        assert_eq!(policy.backoff(0), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(6), Duration::from_millis(100));
    }

    #[test]
    fn test_config_builders() {
        let config = IngestConfig::default()
            .with_lookback_days(7)
            .with_event_buffer(0)
            .with_resample(false);
        assert_eq!(config.lookback_ms(), 7 * 24 * 3_600_000);
        assert_eq!(config.event_buffer, 1);
        assert!(!config.resample);
    }
}
