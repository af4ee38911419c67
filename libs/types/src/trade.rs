//! Unified trade record
//!
//! Public trades and private fills share one shape; `order_id` is only set
//! for fills of the caller's own orders.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::Symbol;
use crate::order::Side;
use crate::record::{Keyed, Timestamped};

/// Complete trade structure as produced by a venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<String>,
    pub order_id: Option<String>,
    pub symbol: Symbol,
    /// Taker side when the venue reports it
    pub side: Option<Side>,
    pub price: Decimal,
    pub amount: Decimal,
    /// Unix milliseconds of execution
    pub timestamp: i64,
}

impl Trade {
    /// Trade value (price × amount)
    pub fn cost(&self) -> Decimal {
        self.price * self.amount
    }

    /// Execution time as a UTC datetime
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

impl Timestamped for Trade {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl Keyed for Trade {
    type Key = (Symbol, String);

    fn key(&self) -> Option<Self::Key> {
        self.id.clone().map(|id| (self.symbol.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn make_trade() -> Trade {
        Trade {
            id: Some("t-1".to_string()),
            order_id: None,
            symbol: Symbol::new("ETH/USD"),
            side: Some(Side::Sell),
            price: Decimal::from(3000),
            amount: Decimal::from_str("0.5").unwrap(),
            timestamp: 1_708_123_456_789,
        }
    }

    #[test]
    fn test_trade_cost() {
        assert_eq!(make_trade().cost(), Decimal::from(1500));
    }

    #[test]
    fn test_trade_datetime() {
        let dt = make_trade().datetime().unwrap();
        assert_eq!(dt.timestamp_millis(), 1_708_123_456_789);
    }

    #[test]
    fn test_trade_serialization() {
        let trade = make_trade();
        let json = serde_json::to_string(&trade).unwrap();
        let deserialized: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(trade, deserialized);
    }
}
