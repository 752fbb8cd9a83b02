//! Exchange clients
//!
//! Every platform is reached through the same [`ExchangeClient`] interface. The
//! REST implementation ([`client::RestExchangeClient`]) is one generic client
//! driven by per-platform configuration data ([`exchange_config`]) and a
//! per-exchange [`dialect`] describing request and response shapes; the
//! [`pagination`] engine implements both history walking patterns.

use crate::ingest::rate_limit::RateLimitError;
use crate::{
    Asset, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint,
};
use async_trait::async_trait;

pub mod batch;
pub mod client;
pub mod dialect;
pub mod exchange_config;
pub mod http;
pub mod pagination;
pub mod parse;
pub mod retry;
pub mod shared_resources;

pub use batch::BatchFetcher;
pub use client::RestExchangeClient;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// API error response
    #[error("API error: {0}")]
    ApiError(String),

    /// Rate limit exceeded after all retries
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The exchange signalled a ban; later requests of the client fail fast for the rest of the run
    #[error("banned by exchange (HTTP {status})")]
    Banned {
        /// Status code that triggered the ban
        status: u16,
    },

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Rate limiter failure
    #[error("rate limiter error: {0}")]
    RateLimiter(#[from] RateLimitError),

    /// Dataset not exposed by this platform
    #[error("{dataset} is not supported on {platform}")]
    Unsupported {
        /// Platform
        platform: Platform,
        /// Dataset requested
        dataset: Dataset,
    },
}

impl FetcherError {
    /// Whether this is a platform-wide ban signal
    pub fn is_ban(&self) -> bool {
        matches!(self, FetcherError::Banned { .. })
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Inclusive time window for a history fetch, Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// Oldest timestamp wanted (the lookback horizon)
    pub start: i64,
    /// Newest timestamp wanted
    pub end: i64,
}

impl FetchWindow {
    /// Create a window
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Whether `timestamp` falls inside the window
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Uniform contract every exchange client implements
///
/// Implementations are shared by all pipelines of a run, so every method takes
/// `&self` and the client must be safe to call concurrently.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Platform served by this client
    fn platform(&self) -> Platform;

    /// List tradable perpetual instruments
    async fn list_assets(&self) -> FetcherResult<Vec<Asset>>;

    /// Funding history of one symbol within `window`, ascending by timestamp
    async fn fetch_funding_history(
        &self,
        symbol: &str,
        window: FetchWindow,
    ) -> FetcherResult<Vec<FundingPoint>>;

    /// Candles of one symbol within `window`, ascending by timestamp
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<CandlePoint>>;

    /// Open interest of one symbol within `window`, ascending by timestamp
    async fn fetch_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<OpenInterestPoint>>;

    /// Long/short account ratio of one symbol within `window`, ascending by timestamp
    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> FetcherResult<Vec<RatioPoint>>;

    /// Whether the platform exposes `dataset`
    fn supports(&self, dataset: Dataset) -> bool;

    /// Whether a ban signal has been received since the last [`reset_ban`](Self::reset_ban)
    fn is_banned(&self) -> bool;

    /// Forget a ban from an earlier run; called when a run starts
    fn reset_ban(&self);
}
