//! Order side, status and the unified order record
//!
//! Order update streams repeat the same id across lifecycle states
//! (open -> partially filled -> closed); the record is keyed by
//! (symbol, id) so caches keep only the latest state.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TypeError;
use crate::ids::Symbol;
use crate::record::{Keyed, Timestamped};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl FromStr for Side {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "bid" | "b" => Ok(Side::Buy),
            "sell" | "ask" | "s" => Ok(Side::Sell),
            _ => Err(TypeError::InvalidSide(s.to_string())),
        }
    }
}

/// Unified order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Resting or partially filled
    Open,
    /// Completely filled (terminal)
    Closed,
    /// Canceled by user or venue (terminal)
    Canceled,
    /// Time-in-force deadline reached (terminal)
    Expired,
    /// Refused by the venue (terminal)
    Rejected,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

impl FromStr for OrderStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "new" | "live" | "partially_filled" | "partiallyfilled" => Ok(OrderStatus::Open),
            "closed" | "filled" => Ok(OrderStatus::Closed),
            "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
            "expired" => Ok(OrderStatus::Expired),
            "rejected" => Ok(OrderStatus::Rejected),
            _ => Err(TypeError::InvalidStatus(s.to_string())),
        }
    }
}

/// Unified order record as produced by a venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue order id; absent on some acknowledgement frames
    pub id: Option<String>,
    pub client_order_id: Option<String>,
    pub symbol: Symbol,
    pub side: Side,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    /// Unix milliseconds of the last update
    pub timestamp: i64,
}

impl Order {
    /// Check quantity invariant: filled + remaining = amount
    pub fn check_invariant(&self) -> bool {
        self.filled + self.remaining == self.amount
    }

    /// Check if order has any fills
    pub fn has_fills(&self) -> bool {
        !self.filled.is_zero()
    }
}

impl Timestamped for Order {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl Keyed for Order {
    type Key = (Symbol, String);

    fn key(&self) -> Option<Self::Key> {
        self.id.clone().map(|id| (self.symbol.clone(), id))
    }
}
