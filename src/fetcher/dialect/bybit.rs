//! Bybit v5 linear perpetuals dialect
//!
//! Every response is wrapped in `{"retCode": 0, "retMsg": "OK", "result": {"list": [...]}}`
//! and every history list is newest first. Pages are walked backward with
//! `endTime = cursor - 1`.

use rust_decimal::Decimal;
use serde_json::Value;

use crate::fetcher::dialect::Dialect;
use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::parse::{as_array, decimal_field, i64_field, parse_decimal, parse_i64, str_field};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Asset, CandlePoint, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint};

const CATEGORY: &str = "linear";

/// retCode returned when the IP exceeds its request frequency
const RET_CODE_RATE_LIMIT: i64 = 10006;

/// Bybit dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitDialect;

impl BybitDialect {
    fn history_request(path: &str, symbol: &str, page: &PageRequest) -> ApiRequest {
        ApiRequest::get(path)
            .param("category", CATEGORY)
            .param("symbol", symbol)
            .param("startTime", page.start)
            .param("endTime", page.upper_bound())
            .param("limit", page.limit)
    }

    /// Unwrap `result.list`, turning a non-zero retCode into an error
    fn result_list(body: &Value) -> FetcherResult<&Vec<Value>> {
        let code = i64_field(body, "retCode")?;
        if code != 0 {
            let message = body
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            if code == RET_CODE_RATE_LIMIT {
                return Err(FetcherError::RateLimitExceeded);
            }
            return Err(FetcherError::ApiError(format!("retCode {code}: {message}")));
        }
        let list = body
            .get("result")
            .and_then(|result| result.get("list"))
            .ok_or_else(|| FetcherError::ParseError("Missing result.list".to_string()))?;
        as_array(list, "result.list")
    }

    /// Kline interval in minutes, or `D` for daily
    fn kline_interval(interval: Interval) -> String {
        match interval {
            Interval::OneDay => "D".to_string(),
            other => (other.to_milliseconds() / 60_000).to_string(),
        }
    }

    /// Period label of the statistics endpoints
    fn stat_period(interval: Interval) -> String {
        match interval {
            Interval::FiveMinutes => "5min".to_string(),
            Interval::FifteenMinutes => "15min".to_string(),
            other => other.to_string(),
        }
    }
}

impl Dialect for BybitDialect {
    fn platform(&self) -> Platform {
        Platform::Bybit
    }

    fn assets_request(&self) -> ApiRequest {
        ApiRequest::get("/v5/market/instruments-info")
            .param("category", CATEGORY)
            .param("limit", 1000)
    }

    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>> {
        let mut assets = Vec::new();
        for entry in Self::result_list(body)? {
            let contract_type = entry.get("contractType").and_then(Value::as_str);
            let status = entry.get("status").and_then(Value::as_str);
            if contract_type != Some("LinearPerpetual") || status != Some("Trading") {
                continue;
            }
            let quote = str_field(entry, "quoteCoin")?;
            if quote != "USDT" {
                continue;
            }
            assets.push(Asset::new(
                Platform::Bybit,
                str_field(entry, "symbol")?,
                str_field(entry, "baseCoin")?,
                quote,
            ));
        }
        Ok(assets)
    }

    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest {
        Self::history_request("/v5/market/funding/history", symbol, page)
    }

    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>> {
        Self::result_list(body)?
            .iter()
            .map(|row| {
                Ok(FundingPoint {
                    platform: Platform::Bybit,
                    symbol: symbol.to_string(),
                    timestamp: i64_field(row, "fundingRateTimestamp")?,
                    funding_rate: decimal_field(row, "fundingRate")?,
                    interval,
                })
            })
            .collect()
    }

    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        ApiRequest::get("/v5/market/kline")
            .param("category", CATEGORY)
            .param("symbol", symbol)
            .param("interval", Self::kline_interval(interval))
            .param("start", page.start)
            .param("end", page.upper_bound())
            .param("limit", page.limit)
    }

    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>> {
        Self::result_list(body)?
            .iter()
            .map(|row| {
                // [startTime, open, high, low, close, volume, turnover]
                let arr = as_array(row, "kline")?;
                if arr.len() < 6 {
                    return Err(FetcherError::ParseError(format!(
                        "Expected at least 6 elements in kline, got {}",
                        arr.len()
                    )));
                }
                Ok(CandlePoint {
                    platform: Platform::Bybit,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: parse_i64(&arr[0], "startTime")?,
                    open: parse_decimal(&arr[1], "open")?,
                    high: parse_decimal(&arr[2], "high")?,
                    low: parse_decimal(&arr[3], "low")?,
                    close: parse_decimal(&arr[4], "close")?,
                    volume: parse_decimal(&arr[5], "volume")?,
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
        Ok(Self::history_request("/v5/market/open-interest", symbol, page)
            .param("intervalTime", Self::stat_period(interval)))
    }

    fn parse_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        Self::result_list(body)?
            .iter()
            .map(|row| {
                Ok(OpenInterestPoint {
                    platform: Platform::Bybit,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: i64_field(row, "timestamp")?,
                    open_interest: decimal_field(row, "openInterest")?,
                    open_interest_value: None,
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
        Ok(Self::history_request("/v5/market/account-ratio", symbol, page)
            .param("period", Self::stat_period(interval)))
    }

    fn parse_ratio(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<RatioPoint>> {
        Self::result_list(body)?
            .iter()
            .map(|row| {
                let long_ratio = decimal_field(row, "buyRatio")?;
                let short_ratio = decimal_field(row, "sellRatio")?;
                Ok(RatioPoint {
                    platform: Platform::Bybit,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: i64_field(row, "timestamp")?,
                    long_ratio,
                    short_ratio,
                    long_short_ratio: long_ratio.checked_div(short_ratio).unwrap_or(Decimal::ZERO),
                })
            })
            .collect()
    }
}
