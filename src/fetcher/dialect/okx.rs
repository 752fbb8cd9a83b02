//! OKX v5 swap dialect
//!
//! Responses are wrapped in `{"code": "0", "msg": "", "data": [...]}`, newest
//! first. History is paged with an exclusive `after`/`end` timestamp cursor.
//! The rubik statistics endpoints return positional arrays, and the account
//! ratio is only published as `long/short`, so the shares are derived from it.

use rust_decimal::Decimal;
use serde_json::Value;

use crate::fetcher::dialect::Dialect;
use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::parse::{as_array, decimal_field, i64_field, parse_decimal, parse_i64, str_field};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Asset, CandlePoint, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint};

/// Error code for "Too Many Requests"
const CODE_RATE_LIMIT: &str = "50011";

/// OKX dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct OkxDialect;

impl OkxDialect {
    /// Unwrap `data`, turning a non-zero code into an error
    fn data(body: &Value) -> FetcherResult<&Vec<Value>> {
        let code = str_field(body, "code")?;
        if code != "0" {
            if code == CODE_RATE_LIMIT {
                return Err(FetcherError::RateLimitExceeded);
            }
            let message = body.get("msg").and_then(Value::as_str).unwrap_or_default();
            return Err(FetcherError::ApiError(format!("code {code}: {message}")));
        }
        let data = body
            .get("data")
            .ok_or_else(|| FetcherError::ParseError("Missing data".to_string()))?;
        as_array(data, "data")
    }

    /// Exclusive "earlier than" timestamp for the page
    fn before(page: &PageRequest) -> i64 {
        page.upper_bound() + 1
    }

    /// Bar label (`5m`, `1H`, `4H`, `1D`)
    fn bar(interval: Interval) -> String {
        match interval {
            Interval::FiveMinutes | Interval::FifteenMinutes => interval.to_string(),
            other => other.to_string().to_uppercase(),
        }
    }

    fn row<'a>(value: &'a Value, min_len: usize, what: &str) -> FetcherResult<&'a Vec<Value>> {
        let arr = as_array(value, what)?;
        if arr.len() < min_len {
            return Err(FetcherError::ParseError(format!(
                "Expected at least {min_len} elements in {what}, got {}",
                arr.len()
            )));
        }
        Ok(arr)
    }
}

impl Dialect for OkxDialect {
    fn platform(&self) -> Platform {
        Platform::Okx
    }

    fn assets_request(&self) -> ApiRequest {
        ApiRequest::get("/api/v5/public/instruments").param("instType", "SWAP")
    }

    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>> {
        let mut assets = Vec::new();
        for entry in Self::data(body)? {
            let settle = entry.get("settleCcy").and_then(Value::as_str);
            let state = entry.get("state").and_then(Value::as_str);
            if settle != Some("USDT") || state != Some("live") {
                continue;
            }
            let inst_id = str_field(entry, "instId")?;
            let base = match entry.get("ctValCcy").and_then(Value::as_str) {
                Some(ccy) if !ccy.is_empty() => ccy,
                _ => inst_id.split('-').next().unwrap_or(inst_id),
            };
            assets.push(Asset::new(Platform::Okx, inst_id, base, "USDT"));
        }
        Ok(assets)
    }

    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest {
        ApiRequest::get("/api/v5/public/funding-rate-history")
            .param("instId", symbol)
            .param("after", Self::before(page))
            .param("limit", page.limit)
    }

    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>> {
        Self::data(body)?
            .iter()
            .map(|row| {
                Ok(FundingPoint {
                    platform: Platform::Okx,
                    symbol: symbol.to_string(),
                    timestamp: i64_field(row, "fundingTime")?,
                    funding_rate: decimal_field(row, "fundingRate")?,
                    interval,
                })
            })
            .collect()
    }

    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        ApiRequest::get("/api/v5/market/history-candles")
            .param("instId", symbol)
            .param("bar", Self::bar(interval))
            .param("after", Self::before(page))
            .param("limit", page.limit)
    }

    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>> {
        Self::data(body)?
            .iter()
            .map(|row| {
                // [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]
                let arr = Self::row(row, 6, "candle")?;
                Ok(CandlePoint {
                    platform: Platform::Okx,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_i64(&arr[0], "ts")?,
                    open: parse_decimal(&arr[1], "open")?,
                    high: parse_decimal(&arr[2], "high")?,
                    low: parse_decimal(&arr[3], "low")?,
                    close: parse_decimal(&arr[4], "close")?,
                    volume: parse_decimal(&arr[5], "vol")?,
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
        Ok(
            ApiRequest::get("/api/v5/rubik/stat/contracts/open-interest-history")
                .param("instId", symbol)
                .param("period", Self::bar(interval))
                .param("end", Self::before(page))
                .param("limit", page.limit),
        )
    }

    fn parse_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        Self::data(body)?
            .iter()
            .map(|row| {
                // [ts, oi, oiCcy, oiUsd]
                let arr = Self::row(row, 3, "open interest")?;
                Ok(OpenInterestPoint {
                    platform: Platform::Okx,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_i64(&arr[0], "ts")?,
                    open_interest: parse_decimal(&arr[2], "oiCcy")?,
                    open_interest_value: arr
                        .get(3)
                        .map(|usd| parse_decimal(usd, "oiUsd"))
                        .transpose()?,
                })
            })
            .collect()
    }

    fn ratio_request(
        &self,
        symbol: &str,
        interval: Interval,
        page: &PageRequest,
    ) -> FetcherResult<ApiRequest> {
        Ok(
            ApiRequest::get("/api/v5/rubik/stat/contracts/long-short-account-ratio-contract")
                .param("instId", symbol)
                .param("period", Self::bar(interval))
                .param("end", Self::before(page))
                .param("limit", page.limit),
        )
    }

    fn parse_ratio(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<RatioPoint>> {
        Self::data(body)?
            .iter()
            .map(|row| {
                // [ts, longShortAcctRatio]
                let arr = Self::row(row, 2, "account ratio")?;
                let ratio = parse_decimal(&arr[1], "longShortAcctRatio")?;
                let denominator = Decimal::ONE + ratio;
                Ok(RatioPoint {
                    platform: Platform::Okx,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_i64(&arr[0], "ts")?,
                    long_ratio: ratio.checked_div(denominator).unwrap_or(Decimal::ZERO),
                    short_ratio: Decimal::ONE.checked_div(denominator).unwrap_or(Decimal::ZERO),
                    long_short_ratio: ratio,
                })
            })
            .collect()
    }
}
