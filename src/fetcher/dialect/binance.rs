//! Binance USDⓈ-M futures dialect, also spoken by Aster
//!
//! # Endpoints
//!
//! - `GET /fapi/v1/exchangeInfo`
//! - `GET /fapi/v1/fundingRate?symbol&startTime&endTime&limit`
//! - `GET /fapi/v1/klines?symbol&interval&startTime&endTime&limit`
//! - `GET /futures/data/openInterestHist?symbol&period&startTime&endTime&limit`
//! - `GET /futures/data/globalLongShortAccountRatio?symbol&period&startTime&endTime&limit`
//!
//! Klines are positional arrays:
//! `[open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...]`

use serde_json::Value;

use crate::fetcher::dialect::Dialect;
use crate::fetcher::http::ApiRequest;
use crate::fetcher::pagination::PageRequest;
use crate::fetcher::parse::{
    as_array, decimal_field, i64_field, opt_decimal_field, parse_decimal, parse_i64, str_field,
};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{
    Asset, CandlePoint, Dataset, FundingPoint, Interval, OpenInterestPoint, Platform, RatioPoint,
};

/// Quote asset of the ingested perpetuals
const QUOTE_ASSET: &str = "USDT";

/// Binance-compatible dialect
#[derive(Debug, Clone, Copy)]
pub struct BinanceDialect {
    platform: Platform,
}

impl BinanceDialect {
    /// Dialect for Binance or a Binance-compatible platform
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    // Aster mirrors /fapi/v1 only
    fn has_statistics(&self) -> bool {
        self.platform == Platform::Binance
    }

    fn window_request(path: &str, symbol: &str, page: &PageRequest) -> ApiRequest {
        ApiRequest::get(path)
            .param("symbol", symbol)
            .param("startTime", page.start)
            .param("endTime", page.end)
            .param("limit", page.limit)
    }
}

impl Dialect for BinanceDialect {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn assets_request(&self) -> ApiRequest {
        ApiRequest::get("/fapi/v1/exchangeInfo")
    }

    fn parse_assets(&self, body: &Value) -> FetcherResult<Vec<Asset>> {
        let symbols = body
            .get("symbols")
            .ok_or_else(|| FetcherError::ParseError("Missing symbols".to_string()))?;

        let mut assets = Vec::new();
        for entry in as_array(symbols, "symbols")? {
            let contract_type = entry.get("contractType").and_then(Value::as_str);
            let status = entry.get("status").and_then(Value::as_str);
            if contract_type != Some("PERPETUAL") || status != Some("TRADING") {
                continue;
            }
            let quote = str_field(entry, "quoteAsset")?;
            if quote != QUOTE_ASSET {
                continue;
            }
            assets.push(Asset::new(
                self.platform,
                str_field(entry, "symbol")?,
                str_field(entry, "baseAsset")?,
                quote,
            ));
        }
        Ok(assets)
    }

    fn funding_request(&self, symbol: &str, page: &PageRequest) -> ApiRequest {
        Self::window_request("/fapi/v1/fundingRate", symbol, page)
    }

    fn parse_funding(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<FundingPoint>> {
        as_array(body, "fundingRate response")?
            .iter()
            .map(|rate| {
                Ok(FundingPoint {
                    platform: self.platform,
                    symbol: symbol.to_string(),
                    timestamp: i64_field(rate, "fundingTime")?,
                    funding_rate: decimal_field(rate, "fundingRate")?,
                    interval,
                })
            })
            .collect()
    }

    fn candles_request(&self, symbol: &str, interval: Interval, page: &PageRequest) -> ApiRequest {
        Self::window_request("/fapi/v1/klines", symbol, page).param("interval", interval)
    }

    fn parse_candles(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<CandlePoint>> {
        let klines = as_array(body, "klines response")?;
        let mut candles = Vec::with_capacity(klines.len());

        for kline in klines {
            let arr = as_array(kline, "kline")?;
            if arr.len() < 6 {
                return Err(FetcherError::ParseError(format!(
                    "Expected at least 6 elements in kline, got {}",
                    arr.len()
                )));
            }

            candles.push(CandlePoint {
                platform: self.platform,
                symbol: symbol.to_string(),
                interval,
                timestamp: parse_i64(&arr[0], "open_time")?,
                open: parse_decimal(&arr[1], "open")?,
                high: parse_decimal(&arr[2], "high")?,
                low: parse_decimal(&arr[3], "low")?,
                close: parse_decimal(&arr[4], "close")?,
                volume: parse_decimal(&arr[5], "volume")?,
            });
        }

        Ok(candles)
    }

    fn open_interest_request(
        &self,
        symbol: &str,
        interval: Interval,
        page: &PageRequest,
    ) -> FetcherResult<ApiRequest> {
        if !self.has_statistics() {
            return Err(self.unsupported(Dataset::OpenInterest));
        }
        Ok(Self::window_request("/futures/data/openInterestHist", symbol, page)
            .param("period", interval))
    }

    fn parse_open_interest(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<OpenInterestPoint>> {
        as_array(body, "openInterestHist response")?
            .iter()
            .map(|row| {
                Ok(OpenInterestPoint {
                    platform: self.platform,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: i64_field(row, "timestamp")?,
                    open_interest: decimal_field(row, "sumOpenInterest")?,
                    open_interest_value: opt_decimal_field(row, "sumOpenInterestValue")?,
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
        if !self.has_statistics() {
            return Err(self.unsupported(Dataset::LongShortRatio));
        }
        Ok(
            Self::window_request("/futures/data/globalLongShortAccountRatio", symbol, page)
                .param("period", interval),
        )
    }

    fn parse_ratio(
        &self,
        symbol: &str,
        interval: Interval,
        body: &Value,
    ) -> FetcherResult<Vec<RatioPoint>> {
        as_array(body, "globalLongShortAccountRatio response")?
            .iter()
            .map(|row| {
                Ok(RatioPoint {
                    platform: self.platform,
                    symbol: symbol.to_string(),
                    interval,
                    timestamp: i64_field(row, "timestamp")?,
                    long_ratio: decimal_field(row, "longAccount")?,
                    short_ratio: decimal_field(row, "shortAccount")?,
                    long_short_ratio: decimal_field(row, "longShortRatio")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn page() -> PageRequest {
        PageRequest {
            start: 1_704_067_200_000,
            end: 1_704_153_600_000,
            cursor: None,
            limit: 1000,
        }
    }

    #[test]
    fn test_parse_assets_keeps_trading_usdt_perpetuals() {
        let body = json!({
            "symbols": [
                {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "ETHUSDT_240329", "contractType": "CURRENT_QUARTER", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT"},
                {"symbol": "BTCUSDC", "contractType": "PERPETUAL", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDC"},
                {"symbol": "LUNAUSDT", "contractType": "PERPETUAL", "status": "SETTLING", "baseAsset": "LUNA", "quoteAsset": "USDT"}
            ]
        });
        let assets = BinanceDialect::new(Platform::Binance)
            .parse_assets(&body)
            .unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].symbol, "BTCUSDT");
        assert_eq!(assets[0].base_asset, "BTC");
        assert!(assets[0].is_active);
    }

    #[test]
    fn test_funding_request_and_parse() {
        let dialect = BinanceDialect::new(Platform::Binance);
        let request = dialect.funding_request("BTCUSDT", &page());
        assert_eq!(request.path, "/fapi/v1/fundingRate");
        assert_eq!(request.query_value("startTime"), Some("1704067200000"));
        assert_eq!(request.query_value("limit"), Some("1000"));

        let body = json!([
            {"symbol": "BTCUSDT", "fundingTime": 1_704_067_200_000i64, "fundingRate": "0.00010000", "markPrice": "42000.1"},
            {"symbol": "BTCUSDT", "fundingTime": 1_704_096_000_000i64, "fundingRate": "-0.00002500", "markPrice": "42100.0"}
        ]);
        let points = dialect
            .parse_funding("BTCUSDT", Interval::EightHours, &body)
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].funding_rate, Decimal::from_str("-0.000025").unwrap());
        assert_eq!(points[1].interval, Interval::EightHours);
    }

    #[test]
    fn test_parse_klines() {
        let dialect = BinanceDialect::new(Platform::Binance);
        let request = dialect.candles_request("BTCUSDT", Interval::OneHour, &page());
        assert_eq!(request.query_value("interval"), Some("1h"));

        let body = json!([[
            1_704_067_200_000i64, "42000.1", "42100.0", "41900.5", "42050.0", "123.456",
            1_704_070_799_999i64, "5190000.0", 1500, "60.0", "2520000.0", "0"
        ]]);
        let candles = dialect
            .parse_candles("BTCUSDT", Interval::OneHour, &body)
            .unwrap();
        assert_eq!(candles[0].timestamp, 1_704_067_200_000);
        assert_eq!(candles[0].volume, Decimal::from_str("123.456").unwrap());
        assert!(dialect
            .parse_candles("BTCUSDT", Interval::OneHour, &json!([[1, "2"]]))
            .is_err());
    }

    #[test]
    fn test_statistics_endpoints() {
        let dialect = BinanceDialect::new(Platform::Binance);
        let request = dialect
            .open_interest_request("BTCUSDT", Interval::OneHour, &page())
            .unwrap();
        assert_eq!(request.query_value("period"), Some("1h"));

        let oi = dialect
            .parse_open_interest(
                "BTCUSDT",
                Interval::OneHour,
                &json!([{"symbol": "BTCUSDT", "sumOpenInterest": "80000.5", "sumOpenInterestValue": "3400000000", "timestamp": 1_704_067_200_000i64}]),
            )
            .unwrap();
        assert_eq!(oi[0].open_interest_value, Some(Decimal::from(3_400_000_000i64)));

        let ratio = dialect
            .parse_ratio(
                "BTCUSDT",
                Interval::OneHour,
                &json!([{"symbol": "BTCUSDT", "longShortRatio": "1.5", "longAccount": "0.6", "shortAccount": "0.4", "timestamp": "1704067200000"}]),
            )
            .unwrap();
        assert_eq!(ratio[0].long_short_ratio, Decimal::from_str("1.5").unwrap());
        assert_eq!(ratio[0].timestamp, 1_704_067_200_000);
    }

    #[test]
    fn test_aster_has_no_statistics() {
        let dialect = BinanceDialect::new(Platform::Aster);
        assert!(matches!(
            dialect.open_interest_request("BTCUSDT", Interval::OneHour, &page()),
            Err(FetcherError::Unsupported { platform: Platform::Aster, .. })
        ));
        assert!(dialect
            .ratio_request("BTCUSDT", Interval::OneHour, &page())
            .is_err());
    }
}
