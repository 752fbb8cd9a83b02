//! # Perp Data Ingestor Library
//!
//! Rate-limited, concurrent ingestion of perpetual-futures market data from six
//! exchanges into an idempotent store, with live stage-based progress reporting.
//!
//! ## Features
//!
//! - **Six Platforms**: Binance, Bybit, OKX, Hyperliquid, dYdX and Aster
//! - **Four Datasets**: funding rates, OHLCV candles, open interest and long/short ratio
//! - **Token Bucket Rate Limiting**: one weighted budget per platform shared by all pipelines
//! - **Bounded Concurrency**: fan-out worker pool with a concurrency ceiling per platform
//! - **Incremental Runs**: only points newer than the stored maximum are written
//! - **Resampling**: hourly funding is aggregated into canonical 8-hour buckets
//!
//! ## Quick Start
//!
//! ```no_run
//! use perp_data_ingestor::ingest::{IngestConfig, IngestionRegistry};
//! use perp_data_ingestor::storage::memory::MemoryStores;
//! use perp_data_ingestor::Platform;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = IngestionRegistry::with_rest_clients(MemoryStores::new().into_stores(), IngestConfig::default())?;
//! let mut events = registry.subscribe(Platform::Binance)?;
//! let handle = registry.start_initial(Platform::Binance).await?;
//! while let Some(message) = events.recv().await {
//!     if message.is_done() {
//!         break;
//!     }
//! }
//! let summary = handle.await?;
//! println!("{:?}", summary.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] - Embedded per-platform profiles (intervals, budgets, concurrency)
//! - [`fetcher`] - Exchange clients, HTTP retry/ban handling and the pagination engine
//! - [`ingest`] - Rate limiter, worker pool, stage tracker and the orchestrator
//! - [`storage`] - Repository interfaces and an in-memory implementation
//! - [`metrics`] - Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Exchange clients and the pagination engine
pub mod fetcher;

/// Ingestion pipeline: limiter, pool, stages, orchestrator
pub mod ingest;

/// Observability metrics
pub mod metrics;

/// Embedded platform profiles
pub mod registry;

/// Storage interfaces
pub mod storage;

/// One hour in milliseconds
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Supported exchange platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Binance USDⓈ-M futures
    Binance,
    /// Bybit linear perpetuals
    Bybit,
    /// OKX swaps
    Okx,
    /// Hyperliquid perpetuals
    Hyperliquid,
    /// dYdX v4 indexer
    Dydx,
    /// Aster futures (Binance-compatible API)
    Aster,
}

impl Platform {
    /// All platforms in canonical order
    pub const ALL: [Platform; 6] = [
        Platform::Binance,
        Platform::Bybit,
        Platform::Okx,
        Platform::Hyperliquid,
        Platform::Dydx,
        Platform::Aster,
    ];

    /// Lowercase platform identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Binance => "binance",
            Platform::Bybit => "bybit",
            Platform::Okx => "okx",
            Platform::Hyperliquid => "hyperliquid",
            Platform::Dydx => "dydx",
            Platform::Aster => "aster",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Platform::Binance),
            "bybit" => Ok(Platform::Bybit),
            "okx" => Ok(Platform::Okx),
            "hyperliquid" => Ok(Platform::Hyperliquid),
            "dydx" => Ok(Platform::Dydx),
            "aster" => Ok(Platform::Aster),
            _ => Err(format!("Invalid platform: {s}")),
        }
    }
}

/// Sampling interval for time-series points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    /// 5 minutes
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minutes
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 1 hour
    #[serde(rename = "1h")]
    OneHour,
    /// 4 hours
    #[serde(rename = "4h")]
    FourHours,
    /// 8 hours
    #[serde(rename = "8h")]
    EightHours,
    /// 1 day
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    /// Convert interval to milliseconds
    pub fn to_milliseconds(&self) -> i64 {
        match self {
            Interval::FiveMinutes => 300_000,
            Interval::FifteenMinutes => 900_000,
            Interval::OneHour => 3_600_000,
            Interval::FourHours => 14_400_000,
            Interval::EightHours => 28_800_000,
            Interval::OneDay => 86_400_000,
        }
    }

    /// Interval length in whole hours (zero for sub-hour intervals)
    pub fn hours(&self) -> i64 {
        self.to_milliseconds() / HOUR_MS
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::EightHours => "8h",
            Interval::OneDay => "1d",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "8h" => Ok(Interval::EightHours),
            "1d" => Ok(Interval::OneDay),
            _ => Err(format!("Invalid interval: {s}")),
        }
    }
}

/// Kind of time-series data ingested by a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Funding rate history
    Funding,
    /// OHLCV candles
    Candles,
    /// Open interest history
    OpenInterest,
    /// Long/short account ratio history
    LongShortRatio,
}

impl Dataset {
    /// All datasets in pipeline order
    pub const ALL: [Dataset; 4] = [
        Dataset::Funding,
        Dataset::Candles,
        Dataset::OpenInterest,
        Dataset::LongShortRatio,
    ];

    /// Lowercase dataset label
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Funding => "funding",
            Dataset::Candles => "ohlcv",
            Dataset::OpenInterest => "open_interest",
            Dataset::LongShortRatio => "long_short_ratio",
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage-assigned asset identifier
pub type AssetId = i64;

/// Tradable perpetual instrument on a platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    /// Registry identifier (0 until the asset registry assigns one)
    pub id: AssetId,
    /// Owning platform
    pub platform: Platform,
    /// Exchange-native symbol (e.g., "BTCUSDT", "BTC-USDT-SWAP", "BTC")
    pub symbol: String,
    /// Base asset (e.g., "BTC")
    pub base_asset: String,
    /// Quote/settlement asset (e.g., "USDT", "USD")
    pub quote_asset: String,
    /// Whether the exchange still lists the instrument
    pub is_active: bool,
}

impl Asset {
    /// Create an active, unregistered asset
    pub fn new(
        platform: Platform,
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            platform,
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            is_active: true,
        }
    }

    /// Validate asset data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("Symbol name cannot be empty".to_string());
        }
        if self.base_asset.is_empty() {
            return Err(format!("Base asset cannot be empty for {}", self.symbol));
        }
        Ok(())
    }
}

/// Storage uniqueness key shared by every point type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointKey {
    /// Platform
    pub platform: Platform,
    /// Exchange-native symbol
    pub symbol: String,
    /// Sampling interval
    pub interval: Interval,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

/// Common accessors for normalized time-series records
pub trait TimeSeriesPoint: Clone + Send + Sync + 'static {
    /// Unix timestamp in milliseconds
    fn timestamp(&self) -> i64;

    /// Uniqueness key used by the storage layer
    fn key(&self) -> PointKey;

    /// Validate record integrity
    fn validate(&self) -> Result<(), String>;
}

/// Funding rate sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundingPoint {
    /// Platform
    pub platform: Platform,
    /// Exchange-native symbol
    pub symbol: String,
    /// Funding time (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Funding rate for the sampling interval (as decimal)
    pub funding_rate: Decimal,
    /// Sampling interval (native 1h/8h, or 8h for resampled points)
    pub interval: Interval,
}

impl TimeSeriesPoint for FundingPoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn key(&self) -> PointKey {
        PointKey {
            platform: self.platform,
            symbol: self.symbol.clone(),
            interval: self.interval,
            timestamp: self.timestamp,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("Symbol name cannot be empty".to_string());
        }
        if self.timestamp <= 0 {
            return Err(format!(
                "Funding time must be positive, got {}",
                self.timestamp
            ));
        }
        Ok(())
    }
}

/// OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandlePoint {
    /// Platform
    pub platform: Platform,
    /// Exchange-native symbol
    pub symbol: String,
    /// Candle interval
    pub interval: Interval,
    /// Open time (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Volume (base asset)
    pub volume: Decimal,
}

impl TimeSeriesPoint for CandlePoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn key(&self) -> PointKey {
        PointKey {
            platform: self.platform,
            symbol: self.symbol.clone(),
            interval: self.interval,
            timestamp: self.timestamp,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.timestamp <= 0 {
            return Err(format!("Open time must be positive, got {}", self.timestamp));
        }

        if self.high < self.open || self.high < self.close {
            return Err(format!(
                "High ({}) must be >= open ({}) and close ({})",
                self.high, self.open, self.close
            ));
        }

        if self.low > self.open || self.low > self.close {
            return Err(format!(
                "Low ({}) must be <= open ({}) and close ({})",
                self.low, self.open, self.close
            ));
        }

        if self.volume < Decimal::ZERO {
            return Err(format!("Volume must be non-negative, got {}", self.volume));
        }

        Ok(())
    }
}

/// Open interest sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenInterestPoint {
    /// Platform
    pub platform: Platform,
    /// Exchange-native symbol
    pub symbol: String,
    /// Sampling interval
    pub interval: Interval,
    /// Sample time (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Open interest in contracts/base units
    pub open_interest: Decimal,
    /// Open interest notional value, when the exchange reports it
    pub open_interest_value: Option<Decimal>,
}

impl TimeSeriesPoint for OpenInterestPoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn key(&self) -> PointKey {
        PointKey {
            platform: self.platform,
            symbol: self.symbol.clone(),
            interval: self.interval,
            timestamp: self.timestamp,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.open_interest < Decimal::ZERO {
            return Err(format!(
                "Open interest must be non-negative, got {}",
                self.open_interest
            ));
        }
        Ok(())
    }
}

/// Long/short account ratio sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioPoint {
    /// Platform
    pub platform: Platform,
    /// Exchange-native symbol
    pub symbol: String,
    /// Sampling interval
    pub interval: Interval,
    /// Sample time (Unix timestamp in milliseconds)
    pub timestamp: i64,
    /// Share of accounts net long (0..1)
    pub long_ratio: Decimal,
    /// Share of accounts net short (0..1)
    pub short_ratio: Decimal,
    /// long_ratio / short_ratio
    pub long_short_ratio: Decimal,
}

impl TimeSeriesPoint for RatioPoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn key(&self) -> PointKey {
        PointKey {
            platform: self.platform,
            symbol: self.symbol.clone(),
            interval: self.interval,
            timestamp: self.timestamp,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.long_ratio < Decimal::ZERO || self.short_ratio < Decimal::ZERO {
            return Err(format!(
                "Ratios must be non-negative, got long={} short={}",
                self.long_ratio, self.short_ratio
            ));
        }
        Ok(())
    }
}
