//! Stateless JSON field helpers shared by every exchange dialect
//!
//! Exchanges disagree on whether numbers travel as JSON strings or numbers
//! (Binance sends `"0.00010000"`, Hyperliquid sends `"0.0000125"`, dYdX sends
//! ISO timestamps). These helpers accept both forms and turn any mismatch into
//! [`FetcherError::ParseError`] naming the offending field.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::fetcher::{FetcherError, FetcherResult};

/// Parse a decimal from a JSON string or number
pub fn parse_decimal(value: &Value, field_name: &str) -> FetcherResult<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(FetcherError::ParseError(format!(
                "{field_name} is not a string or number"
            )))
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| FetcherError::ParseError(format!("Failed to parse {field_name}: {e}")))
}

/// Parse an integer from a JSON number or numeric string
pub fn parse_i64(value: &Value, field_name: &str) -> FetcherResult<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FetcherError::ParseError(format!("{field_name} is not an integer"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| FetcherError::ParseError(format!("Failed to parse {field_name}: {e}"))),
        _ => Err(FetcherError::ParseError(format!(
            "{field_name} is not a string or number"
        ))),
    }
}

/// Parse an RFC 3339 timestamp into Unix milliseconds
pub fn parse_iso_millis(value: &Value, field_name: &str) -> FetcherResult<i64> {
    let text = value
        .as_str()
        .ok_or_else(|| FetcherError::ParseError(format!("{field_name} is not a string")))?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| FetcherError::ParseError(format!("Failed to parse {field_name}: {e}")))
}

/// Required object field
pub fn field<'a>(object: &'a Value, key: &str) -> FetcherResult<&'a Value> {
    object
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| FetcherError::ParseError(format!("Missing {key}")))
}

/// Required string field
pub fn str_field<'a>(object: &'a Value, key: &str) -> FetcherResult<&'a str> {
    field(object, key)?
        .as_str()
        .ok_or_else(|| FetcherError::ParseError(format!("{key} is not a string")))
}

/// Required decimal field
pub fn decimal_field(object: &Value, key: &str) -> FetcherResult<Decimal> {
    parse_decimal(field(object, key)?, key)
}

/// Optional decimal field, `None` when absent, null or empty
pub fn opt_decimal_field(object: &Value, key: &str) -> FetcherResult<Option<Decimal>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => parse_decimal(value, key).map(Some),
    }
}

/// Required integer field
pub fn i64_field(object: &Value, key: &str) -> FetcherResult<i64> {
    parse_i64(field(object, key)?, key)
}

/// Interpret `value` as a JSON array
pub fn as_array<'a>(value: &'a Value, what: &str) -> FetcherResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| FetcherError::ParseError(format!("{what} is not an array")))
}
