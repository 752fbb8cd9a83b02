//! Per-exchange REST configuration
//!
//! Makes the differences between exchanges purely configuration: base URL,
//! page sizes, pagination style and request weight per dataset. Request and
//! response shapes live in [`crate::fetcher::dialect`].
//!
//! # Rate Limit Weights
//!
//! Each endpoint weight is passed to the platform's token bucket before every
//! attempt. Weights are expressed in the same unit as the platform's budget in
//! `registry/platforms.json` (request weight for Binance/Aster/Hyperliquid,
//! plain request count elsewhere).

use crate::fetcher::pagination::PaginationStyle;
use crate::{Dataset, Platform};

/// Paging and weight settings of one history endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Maximum points per page
    pub page_limit: usize,
    /// Token bucket weight per request
    pub weight: u32,
    /// How the endpoint is paged
    pub style: PaginationStyle,
}

/// REST configuration of one exchange
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// Platform
    pub platform: Platform,
    /// Base URL for API
    pub base_url: &'static str,
    /// Weight of the instrument listing request
    pub assets_weight: u32,
    /// Funding history endpoint
    pub funding: Option<EndpointConfig>,
    /// Candle endpoint
    pub candles: Option<EndpointConfig>,
    /// Open interest history endpoint
    pub open_interest: Option<EndpointConfig>,
    /// Long/short account ratio endpoint
    pub ratio: Option<EndpointConfig>,
}

impl ExchangeConfig {
    /// Endpoint settings of a dataset, `None` when the platform does not expose it
    pub fn endpoint(&self, dataset: Dataset) -> Option<&EndpointConfig> {
        match dataset {
            Dataset::Funding => self.funding.as_ref(),
            Dataset::Candles => self.candles.as_ref(),
            Dataset::OpenInterest => self.open_interest.as_ref(),
            Dataset::LongShortRatio => self.ratio.as_ref(),
        }
    }
}

const WINDOW_WITH_CURSOR: PaginationStyle = PaginationStyle::Window {
    forward_cursor: true,
};
const WINDOW_ONLY: PaginationStyle = PaginationStyle::Window {
    forward_cursor: false,
};

/// Binance USDⓈ-M futures
///
/// - fundingRate: 1000 per page, ascending window
/// - klines: weight 5 at limit 1000
/// - openInterestHist / globalLongShortAccountRatio: 500 per page, last 30 days only
pub const BINANCE_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Binance,
    base_url: "https://fapi.binance.com",
    assets_weight: 1,
    funding: Some(EndpointConfig {
        page_limit: 1000,
        weight: 1,
        style: WINDOW_WITH_CURSOR,
    }),
    candles: Some(EndpointConfig {
        page_limit: 1000,
        weight: 5,
        style: WINDOW_WITH_CURSOR,
    }),
    open_interest: Some(EndpointConfig {
        page_limit: 500,
        weight: 1,
        style: WINDOW_WITH_CURSOR,
    }),
    ratio: Some(EndpointConfig {
        page_limit: 500,
        weight: 1,
        style: WINDOW_WITH_CURSOR,
    }),
};

/// Aster futures, Binance-compatible `/fapi/v1` surface without the `/futures/data` statistics
pub const ASTER_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Aster,
    base_url: "https://fapi.asterdex.com",
    assets_weight: 1,
    funding: Some(EndpointConfig {
        page_limit: 1000,
        weight: 1,
        style: WINDOW_WITH_CURSOR,
    }),
    candles: Some(EndpointConfig {
        page_limit: 1000,
        weight: 5,
        style: WINDOW_WITH_CURSOR,
    }),
    open_interest: None,
    ratio: None,
};

/// Bybit v5 linear perpetuals, every history endpoint is newest-first
pub const BYBIT_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Bybit,
    base_url: "https://api.bybit.com",
    assets_weight: 1,
    funding: Some(EndpointConfig {
        page_limit: 200,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    candles: Some(EndpointConfig {
        page_limit: 1000,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    open_interest: Some(EndpointConfig {
        page_limit: 200,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    ratio: Some(EndpointConfig {
        page_limit: 500,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
};

/// OKX v5 swaps, newest-first with an `after` cursor
pub const OKX_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Okx,
    base_url: "https://www.okx.com",
    assets_weight: 1,
    funding: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    candles: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    open_interest: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    ratio: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
};

/// Hyperliquid info API (POST), ascending windows
///
/// `candleSnapshot` only serves the most recent 5000 candles, so a full page
/// cannot be continued and older history is an accepted gap.
pub const HYPERLIQUID_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Hyperliquid,
    base_url: "https://api.hyperliquid.xyz",
    assets_weight: 20,
    funding: Some(EndpointConfig {
        page_limit: 500,
        weight: 20,
        style: WINDOW_WITH_CURSOR,
    }),
    candles: Some(EndpointConfig {
        page_limit: 5000,
        weight: 20,
        style: WINDOW_ONLY,
    }),
    open_interest: None,
    ratio: None,
};

/// dYdX v4 indexer, newest-first with ISO-8601 "before or at" cursors
///
/// Open interest is read from the `startingOpenInterest` field of hourly candles.
pub const DYDX_CONFIG: ExchangeConfig = ExchangeConfig {
    platform: Platform::Dydx,
    base_url: "https://indexer.dydx.trade/v4",
    assets_weight: 1,
    funding: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    candles: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    open_interest: Some(EndpointConfig {
        page_limit: 100,
        weight: 1,
        style: PaginationStyle::CursorBackward,
    }),
    ratio: None,
};

/// Configuration of a platform
pub fn exchange_config(platform: Platform) -> &'static ExchangeConfig {
    match platform {
        Platform::Binance => &BINANCE_CONFIG,
        Platform::Bybit => &BYBIT_CONFIG,
        Platform::Okx => &OKX_CONFIG,
        Platform::Hyperliquid => &HYPERLIQUID_CONFIG,
        Platform::Dydx => &DYDX_CONFIG,
        Platform::Aster => &ASTER_CONFIG,
    }
}
