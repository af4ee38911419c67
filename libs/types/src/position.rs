//! Derivatives position record
//!
//! Venues push one position per (symbol, side) in hedge mode, so the record
//! is keyed by that pair rather than by an id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::Symbol;
use crate::record::{Keyed, Timestamped};

/// Position side enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Long position - profit when price increases
    Long,
    /// Short position - profit when price decreases
    Short,
}

/// Position snapshot as produced by a venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub contracts: Decimal,
    pub entry_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    /// Unix milliseconds of the last update
    pub timestamp: i64,
}

impl Position {
    /// A position with zero contracts is closed.
    pub fn is_closed(&self) -> bool {
        self.contracts.is_zero()
    }
}

impl Timestamped for Position {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl Keyed for Position {
    type Key = (Symbol, PositionSide);

    fn key(&self) -> Option<Self::Key> {
        Some((self.symbol.clone(), self.side))
    }
}
