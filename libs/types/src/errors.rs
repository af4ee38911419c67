//! Error types for record parsing
//!
//! Adapters translate vendor fields into unified records; these errors cover
//! the field-level failures they can hit. Cache operations never return them.

use thiserror::Error;

/// Field-level parse failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_error_display() {
        let err = TypeError::InvalidSymbol("BTCUSDT".to_string());
        assert_eq!(err.to_string(), "Invalid symbol: BTCUSDT");
    }

    #[test]
    fn test_timeframe_error_display() {
        let err = TypeError::InvalidTimeframe("7m".to_string());
        assert!(err.to_string().contains("7m"));
    }
}
