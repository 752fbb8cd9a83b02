//! Hyperliquid info API dialect
//!
//! Every call is `POST /info` with a JSON body selecting the request type.
//! Funding settles hourly. Open interest and account ratios have no history
//! endpoint.

use serde_json::{json, Value};

use crate::fetcher::dialect::Dialect;
use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::parse::{as_array, decimal_field, i64_field, str_field};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Asset, CandlePoint, FundingPoint, Interval, Platform};

const INFO_PATH: &str = "/info";

/// Hyperliquid dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperliquidDialect;

impl Dialect for HyperliquidDialect {
    fn platform(&self) -> Platform {
        Platform::Hyperliquid
    }

    fn assets_request(&self) -> ApiRequest {
        ApiRequest::post(INFO_PATH, json!({ "type": "meta" }))
    }

    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>> {
        let universe = body
            .get("universe")
            .ok_or_else(|| FetcherError::ParseError("Missing universe".to_string()))?;

        let mut assets = Vec::new();
        for entry in as_array(universe, "universe")? {
            let delisted = entry
                .get("isDelisted")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if delisted {
                continue;
            }
            let name = str_field(entry, "name")?;
            assets.push(Asset::new(Platform::Hyperliquid, name, name, "USD"));
        }
        Ok(assets)
    }

    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest {
        ApiRequest::post(
            INFO_PATH,
            json!({
                "type": "fundingHistory",
                "coin": symbol,
                "startTime": page.start,
                "endTime": page.end,
            }),
        )
    }

    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>> {
        as_array(body, "fundingHistory response")?
            .iter()
            .map(|row| {
                Ok(FundingPoint {
                    platform: Platform::Hyperliquid,
                    symbol: symbol.to_string(),
                    timestamp: i64_field(row, "time")?,
                    funding_rate: decimal_field(row, "fundingRate")?,
                    interval,
                })
            })
            .collect()
    }

    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        ApiRequest::post(
            INFO_PATH,
            json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": symbol,
                    "interval": interval.to_string(),
                    "startTime": page.start,
                    "endTime": page.end,
                }
            }),
        )
    }

    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>> {
        as_array(body, "candleSnapshot response")?
            .iter()
            .map(|row| {
                Ok(CandlePoint {
                    platform: Platform::Hyperliquid,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: i64_field(row, "t")?,
                    open: decimal_field(row, "o")?,
                    high: decimal_field(row, "h")?,
                    low: decimal_field(row, "l")?,
                    close: decimal_field(row, "c")?,
                    volume: decimal_field(row, "v")?,
                })
            })
            .collect()
    }
}
