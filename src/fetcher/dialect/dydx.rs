//! dYdX v4 indexer dialect
//!
//! The indexer pages newest first with inclusive ISO-8601 upper bounds
//! (`effectiveBeforeOrAt`, `toISO`). Funding settles hourly. Hourly candles
//! carry `startingOpenInterest`, which doubles as the open interest history.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::fetcher::dialect::Dialect;
use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::parse::{as_array, decimal_field, field, parse_iso_millis, str_field};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Asset, CandlePoint, FundingPoint, Interval, OpenInterestPoint, Platform};

/// dYdX dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct DydxDialect;

impl DydxDialect {
    fn resolution(interval: Interval) -> &'static str {
        match interval {
            Interval::FiveMinutes => "5MINS",
            Interval::FifteenMinutes => "15MINS",
            Interval::OneHour => "1HOUR",
            Interval::FourHours => "4HOURS",
            // No native 8h resolution; callers only request 1h
            Interval::EightHours => "4HOURS",
            Interval::OneDay => "1DAY",
        }
    }

    fn candles_page(symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        ApiRequest::get(format!("/candles/perpetualMarkets/{symbol}"))
            .param("resolution", Self::resolution(interval))
            .param("fromISO", iso(page.start))
            .param("toISO", iso(page.upper_bound()))
            .param("limit", page.limit)
    }

    fn list<'a>(body: &'a Value, key: &str) -> FetcherResult<&'a Vec<Value>> {
        as_array(field(body, key)?, key)
    }
}

/// Unix milliseconds as RFC 3339 with millisecond precision
fn iso(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Dialect for DydxDialect {
    fn platform(&self) -> Platform {
        Platform::Dydx
    }

    fn assets_request(&self) -> ApiRequest {
        ApiRequest::get("/perpetualMarkets")
    }

    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>> {
        let markets = body
            .get("markets")
            .and_then(Value::as_object)
            .ok_or_else(|| FetcherError::ParseError("Missing markets".to_string()))?;

        let mut assets = Vec::new();
        for market in markets.values() {
            if market.get("status").and_then(Value::as_str) != Some("ACTIVE") {
                continue;
            }
            let ticker = str_field(market, "ticker")?;
            let (base, quote) = ticker.split_once('-').unwrap_or((ticker, "USD"));
            assets.push(Asset::new(Platform::Dydx, ticker, base, quote));
        }
        // Object iteration order is not meaningful
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(assets)
    }

    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest {
        ApiRequest::get(format!("/historicalFunding/{symbol}"))
            .param("effectiveBeforeOrAt", iso(page.upper_bound()))
            .param("limit", page.limit)
    }

    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>> {
        Self::list(body, "historicalFunding")?
            .iter()
            .map(|row| {
                Ok(FundingPoint {
                    platform: Platform::Dydx,
                    symbol: symbol.to_string(),
                    timestamp: parse_iso_millis(field(row, "effectiveAt")?, "effectiveAt")?,
                    funding_rate: decimal_field(row, "rate")?,
                    interval,
                })
            })
            .collect()
    }

    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        Self::candles_page(symbol, interval, page)
    }

    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>> {
        Self::list(body, "candles")?
            .iter()
            .map(|row| {
                Ok(CandlePoint {
                    platform: Platform::Dydx,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_iso_millis(field(row, "startedAt")?, "startedAt")?,
                    open: decimal_field(row, "open")?,
                    high: decimal_field(row, "high")?,
                    low: decimal_field(row, "low")?,
                    close: decimal_field(row, "close")?,
                    volume: decimal_field(row, "baseTokenVolume")?,
                })
            })
            .collect()
    }

    fn open_interest_request(
        &self,
        symbol: &str,
        interval: Interval,
        page: &PageRequest,
    ) -> FetcherResult<ApiRequest> {
        Ok(Self::candles_page(symbol, interval, page))
    }

    fn parse_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        Self::list(body, "candles")?
            .iter()
            .map(|row| {
                Ok(OpenInterestPoint {
                    platform: Platform::Dydx,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_iso_millis(field(row, "startedAt")?, "startedAt")?,
                    open_interest: decimal_field(row, "startingOpenInterest")?,
                    open_interest_value: None,
                })
            })
            .collect()
    }
}
