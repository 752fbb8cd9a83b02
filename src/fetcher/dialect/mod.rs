//! Exchange dialects
//!
//! A dialect turns a [`PageRequest`] into the exchange's [`ApiRequest`] and
//! the exchange's JSON back into normalized points. It performs no I/O, so
//! every request builder and parser is unit-tested against captured payloads.
//!
//! Endpoint weights and page sizes are not part of a dialect; they come from
//! [`crate::fetcher::exchange_config`].

use serde_json::Value;

use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{
    Asset, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint,
};

pub mod binance;
pub mod bybit;
pub mod dydx;
pub mod hyperliquid;
pub mod okx;

pub use binance::BinanceDialect;
pub use bybit::BybitDialect;
pub use dydx::DydxDialect;
pub use hyperliquid::HyperliquidDialect;
pub use okx::OkxDialect;

/// Request and response shapes of one exchange
pub trait Dialect: Send + Sync {
    /// Platform spoken by this dialect
    fn platform(&self) -> Platform;

    /// Instrument listing request
    fn assets_request(&self) -> ApiRequest;

    /// Parse the instrument listing into active perpetual assets
    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>>;

    /// Funding history page request
    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest;

    /// Parse a funding history page; `interval` is the platform's native funding interval
    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>>;

    /// Candle page request
    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest;

    /// Parse a candle page
    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>>;

    /// Open interest page request
    fn open_interest_request(
        &self,
        _symbol: &str,
        _interval: Interval,
        _page: &PageRequest,
    ) -> FetcherResult<ApiRequest> {
        Err(self.unsupported(Dataset::OpenInterest))
    }

    /// Parse an open interest page
    fn parse_open_interest(
        &self,
        _symbol: &str,
        _interval: Interval,
        _body: &Value,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        Err(self.unsupported(Dataset::OpenInterest))
    }

    /// Long/short ratio page request
    fn ratio_request(
        &self,
        _symbol: &str,
        _interval: Interval,
        _page: &PageRequest,
    ) -> FetcherResult<ApiRequest> {
        Err(self.unsupported(Dataset::LongShortRatio))
    }

    /// Parse a long/short ratio page
    fn parse_ratio(
        &self,
        _symbol: &str,
        _interval: Interval,
        _body: &Value,
    ) -> FetcherResult<Vec<RatioPoint>> {
        Err(self.unsupported(Dataset::LongShortRatio))
    }

    /// Error for a dataset this platform does not expose
    fn unsupported(&self, dataset: Dataset) -> FetcherError {
        FetcherError::Unsupported {
            platform: self.platform(),
            dataset,
        }
    }
}

/// Dialect of a platform
pub fn dialect_for(platform: Platform) -> Box<dyn Dialect> {
    match platform {
        Platform::Binance | Platform::Aster => Box::new(BinanceDialect::new(platform)),
        Platform::Bybit => Box::new(BybitDialect),
        Platform::Okx => Box::new(OkxDialect),
        Platform::Hyperliquid => Box::new(HyperliquidDialect),
        Platform::Dydx => Box::new(DydxDialect),
    }
}
