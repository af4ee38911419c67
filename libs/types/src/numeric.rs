//! Decimal helpers for prices and amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Venues send numbers as JSON strings or JSON numbers; both go through
//! `parse_decimal`. `canonical_string` is the rendering used wherever a
//! number must match the venue's own text form (checksums, cache keys).

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::errors::TypeError;

/// Parse a decimal from venue text, accepting scientific notation.
pub fn parse_decimal(raw: &str) -> Result<Decimal, TypeError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| TypeError::InvalidDecimal(raw.to_string()))
}

/// Parse a decimal from a JSON value that may be a string or a number.
///
/// Missing or null values degrade to `None` rather than an error.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => parse_decimal(s).ok(),
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()).ok(),
        _ => None,
    }
}

/// Render a decimal without trailing zeros ("0.0100" -> "0.01", "5.0" -> "5").
pub fn canonical_string(value: Decimal) -> String {
    value.normalize().to_string()
}
