//! Exact decimal parsing for provider values.
//!
//! Providers hand us prices as CSV cells, JSON strings, JSON numbers and
//! spreadsheet floats. All of them go through the decimal text form so that
//! `0.6612` stays `0.6612` instead of picking up binary float noise.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

/// Parse a decimal as published by a provider.
///
/// Accepts surrounding whitespace, a leading `$`, thousands separators and
/// scientific notation. Returns `None` for blanks and anything else.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Decimal from a JSON value that may be either a number or a numeric string.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

/// Decimal from a spreadsheet float, via its shortest round-trip text form.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    parse_decimal(&value.to_string())
}

/// Fix the number of decimal places, padding with zeros when needed.
pub fn with_scale(mut value: Decimal, scale: u32) -> Decimal {
    value.rescale(scale);
    value
}
