//! OHLCV bars and timeframes
//!
//! Bar boundaries are aligned to epoch (e.g., 1m bars open on minute
//! boundaries). All timestamps are Unix milliseconds.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TypeError;
use crate::ids::Symbol;
use crate::record::Timestamped;

/// Supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 4 hours
    H4,
    /// 1 day
    D1,
    /// 1 week
    W1,
}

impl Timeframe {
    /// Duration of this timeframe in milliseconds.
    pub fn duration_millis(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::M30 => 30 * 60_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 4 * 3_600_000,
            Timeframe::D1 => 86_400_000,
            Timeframe::W1 => 7 * 86_400_000,
        }
    }

    /// All standard timeframes.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
        ]
    }

    /// Align a timestamp to this timeframe's boundary (floor).
    pub fn align_to_boundary(&self, timestamp_millis: i64) -> i64 {
        let duration = self.duration_millis();
        timestamp_millis.div_euclid(duration) * duration
    }

    /// Venue-style label ("1m", "4h", ...)
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl FromStr for Timeframe {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.label() == s)
            .ok_or_else(|| TypeError::InvalidTimeframe(s.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Bar open time (Unix milliseconds)
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Ohlcv {
    /// Open a bar from a single trade.
    pub fn from_trade(
        symbol: Symbol,
        timeframe: Timeframe,
        price: Decimal,
        volume: Decimal,
        timestamp: i64,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            timestamp: timeframe.align_to_boundary(timestamp),
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Fold a later update for the same bucket into this bar.
    ///
    /// `other` is treated as newer: it sets the close, extends high/low and
    /// adds its volume. Use this when a venue pushes trades or partial bars;
    /// venues that push the whole forming bar should replace instead.
    pub fn merge(&mut self, other: &Ohlcv) {
        if other.high > self.high {
            self.high = other.high;
        }
        if other.low < self.low {
            self.low = other.low;
        }
        self.close = other.close;
        self.volume += other.volume;
    }

    /// Validate bar integrity (OHLCV invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }
}

impl Timestamped for Ohlcv {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: i64) -> i64 {
        m * 60_000
    }

    fn bar(price: i64, volume: i64, ts: i64) -> Ohlcv {
        Ohlcv::from_trade(
            Symbol::new("BTC/USDT"),
            Timeframe::M1,
            Decimal::from(price),
            Decimal::from(volume),
            ts,
        )
    }

    #[test]
    fn test_timeframe_duration() {
        assert_eq!(Timeframe::M1.duration_millis(), 60_000);
        assert_eq!(Timeframe::H1.duration_millis(), 3_600_000);
        assert_eq!(Timeframe::D1.duration_millis(), 86_400_000);
    }

    #[test]
    fn test_timeframe_alignment() {
        let ts = minutes(5) + 30_000; // 5m30s
        assert_eq!(Timeframe::M1.align_to_boundary(ts), minutes(5));
        assert_eq!(Timeframe::M5.align_to_boundary(ts), minutes(5));
        assert_eq!(Timeframe::M15.align_to_boundary(ts), minutes(0));
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!(Timeframe::W1.to_string(), "1w");
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_bar_from_trade_aligns() {
        let b = bar(50000, 1, minutes(3) + 10_000);
        assert_eq!(b.timestamp, minutes(3));
        assert!(b.is_valid());
    }

    #[test]
    fn test_bar_merge() {
        let mut b = bar(50000, 1, 0);
        b.merge(&bar(51000, 2, 1_000)); // New high
        b.merge(&bar(49000, 3, 2_000)); // New low
        b.merge(&bar(50500, 1, 3_000)); // Close

        assert_eq!(b.open, Decimal::from(50000));
        assert_eq!(b.high, Decimal::from(51000));
        assert_eq!(b.low, Decimal::from(49000));
        assert_eq!(b.close, Decimal::from(50500));
        assert_eq!(b.volume, Decimal::from(7));
        assert!(b.is_valid());
    }

    #[test]
    fn test_bar_integrity_validation() {
        let invalid = Ohlcv {
            high: Decimal::from(49000), // High < Open
            ..bar(50000, 1, 0)
        };
        assert!(!invalid.is_valid());
    }
}
