//! Price-level order book mirror
//!
//! Maintains a venue's order book for one symbol from a snapshot plus a
//! stream of incremental deltas. Uses `BTreeMap` for sorted iteration and
//! `Decimal` for prices and sizes.
//!
//! Lifecycle:
//! - `Uninitialized` → `AwaitingSnapshot` when the subscribe goes out
//! - `AwaitingSnapshot` → `Synced` on `reset`
//! - any state → `Uninitialized` on checksum mismatch, sequence gap or
//!   reconnect (local levels discarded)
//!
//! Deltas that arrive before the snapshot are buffered or dropped according
//! to the [`DeltaPolicy`]; they are never applied to an unsynced book.
//! Levels with size zero are removed, never stored.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::ids::Symbol;

use crate::checksum::{checksum_matches, ChecksumStrategy};
use crate::error::StreamError;

/// Which side of the book a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bids,
    Asks,
}

impl FromStr for BookSide {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bids" | "bid" | "buy" | "b" => Ok(BookSide::Bids),
            "asks" | "ask" | "sell" | "a" => Ok(BookSide::Asks),
            _ => Err(StreamError::Decode(format!("unknown book side: {s}"))),
        }
    }
}

/// A single aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Book synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookState {
    Uninitialized,
    AwaitingSnapshot,
    Synced,
}

impl fmt::Display for BookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookState::Uninitialized => "uninitialized",
            BookState::AwaitingSnapshot => "awaiting_snapshot",
            BookState::Synced => "synced",
        };
        f.write_str(s)
    }
}

/// What to do with deltas that arrive before the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum DeltaPolicy {
    /// Drop them; the snapshot alone defines the book.
    Discard,
    /// Keep up to `max` updates and replay those newer than the snapshot.
    Buffer { max: usize },
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        DeltaPolicy::Buffer { max: 1_000 }
    }
}

/// Full replacement of both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Any order; zero sizes are ignored.
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub nonce: Option<u64>,
    pub timestamp: Option<i64>,
}

/// One price/size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDelta {
    pub side: BookSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// An incremental message: deltas plus the venue's sequencing fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookUpdate {
    /// Applied in the order given.
    pub deltas: Vec<BookDelta>,
    /// Sequence number this update brings the book to.
    pub nonce: Option<u64>,
    /// Sequence number the book must be at for this update to apply.
    pub prev_nonce: Option<u64>,
    pub timestamp: Option<i64>,
}

/// Result of offering an update to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Held until the snapshot arrives.
    Buffered,
    /// Book not synced and the policy (or buffer bound) dropped it.
    Discarded,
    /// Nonce not newer than the book's; ignored as a duplicate.
    Stale,
}

/// Read-only top-of-book view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub symbol: Symbol,
    /// Descending price order (best first).
    pub bids: Vec<PriceLevel>,
    /// Ascending price order (best first).
    pub asks: Vec<PriceLevel>,
    pub nonce: Option<u64>,
    pub timestamp: Option<i64>,
}

/// Live order book for a single symbol.
#[derive(Debug, Clone)]
pub struct PriceLevelBook {
    symbol: Symbol,
    /// price → size; iterated in reverse for best-bid-first.
    bids: BTreeMap<Decimal, Decimal>,
    /// price → size; ascending is best-ask-first.
    asks: BTreeMap<Decimal, Decimal>,
    state: BookState,
    nonce: Option<u64>,
    timestamp: Option<i64>,
    policy: DeltaPolicy,
    pending: VecDeque<BookUpdate>,
    /// Buffered deltas were dropped since the last snapshot.
    overflowed: bool,
}

impl PriceLevelBook {
    /// Create an empty, uninitialized book.
    pub fn new(symbol: Symbol, policy: DeltaPolicy) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            state: BookState::Uninitialized,
            nonce: None,
            timestamp: None,
            policy,
            pending: VecDeque::new(),
            overflowed: false,
        }
    }

    /// Mark that a subscribe was sent and a snapshot is expected.
    pub fn await_snapshot(&mut self) {
        if self.state == BookState::Uninitialized {
            self.state = BookState::AwaitingSnapshot;
        }
    }

    /// Replace both sides from a snapshot and become synced.
    ///
    /// Buffered updates newer than the snapshot are replayed in arrival
    /// order and must chain from the snapshot nonce through each `prev_nonce`.
    /// A break in that chain, or an overflowed buffer whose survivors cannot
    /// be chained, invalidates the book and returns `SequenceGap`. Returns
    /// the number of updates replayed.
    pub fn reset(&mut self, snapshot: BookSnapshot) -> Result<usize, StreamError> {
        self.bids = Self::collect_side(snapshot.bids);
        self.asks = Self::collect_side(snapshot.asks);
        self.nonce = snapshot.nonce;
        self.timestamp = snapshot.timestamp;
        self.state = BookState::Synced;

        let overflowed = std::mem::take(&mut self.overflowed);
        let mut replayed = 0;
        while let Some(update) = self.pending.pop_front() {
            let newer = match (update.nonce, self.nonce) {
                (Some(update_nonce), Some(book_nonce)) => update_nonce > book_nonce,
                _ => true,
            };
            if !newer {
                continue;
            }

            let chained = match (update.prev_nonce, self.nonce) {
                (Some(prev), Some(book_nonce)) => prev == book_nonce,
                _ => !overflowed,
            };
            if !chained {
                let expected = self.nonce.unwrap_or_default();
                let actual = update.prev_nonce.or(update.nonce).unwrap_or_default();
                warn!(
                    symbol = %self.symbol,
                    expected,
                    actual,
                    overflowed,
                    "Buffered deltas do not follow the snapshot, discarding local book"
                );
                self.invalidate();
                return Err(StreamError::SequenceGap {
                    symbol: self.symbol.to_string(),
                    expected,
                    actual,
                });
            }

            self.apply_levels(&update);
            replayed += 1;
        }

        debug!(
            symbol = %self.symbol,
            bids = self.bids.len(),
            asks = self.asks.len(),
            nonce = ?self.nonce,
            replayed,
            "Book snapshot applied"
        );
        Ok(replayed)
    }

    fn collect_side(levels: Vec<PriceLevel>) -> BTreeMap<Decimal, Decimal> {
        levels
            .into_iter()
            .filter(|level| level.size > Decimal::ZERO)
            .map(|level| (level.price, level.size))
            .collect()
    }

    /// Apply one price/size change.
    ///
    /// Size zero removes the level; a positive size inserts or replaces it.
    pub fn apply_delta(&mut self, side: BookSide, price: Decimal, size: Decimal) -> ApplyOutcome {
        self.apply_delta_batch(side, &[(price, size)])
    }

    /// Apply a batch of changes to one side in the order given.
    pub fn apply_delta_batch(&mut self, side: BookSide, deltas: &[(Decimal, Decimal)]) -> ApplyOutcome {
        let update = BookUpdate {
            deltas: deltas
                .iter()
                .map(|&(price, size)| BookDelta { side, price, size })
                .collect(),
            ..BookUpdate::default()
        };
        match self.hold_unless_synced(update) {
            Ok(outcome) => outcome,
            Err(update) => {
                self.apply_levels(&update);
                ApplyOutcome::Applied
            }
        }
    }

    /// Apply an incremental message with sequence validation.
    ///
    /// A `prev_nonce` that does not match the synced book's nonce is a gap:
    /// the book is invalidated and `SequenceGap` returned.
    pub fn apply_update(&mut self, update: BookUpdate) -> Result<ApplyOutcome, StreamError> {
        let update = match self.hold_unless_synced(update) {
            Ok(outcome) => return Ok(outcome),
            Err(update) => update,
        };

        if let (Some(update_nonce), Some(book_nonce)) = (update.nonce, self.nonce) {
            if update_nonce <= book_nonce {
                debug!(
                    symbol = %self.symbol,
                    nonce = update_nonce,
                    book_nonce,
                    "Dropping stale book update"
                );
                return Ok(ApplyOutcome::Stale);
            }
        }

        if let (Some(prev), Some(book_nonce)) = (update.prev_nonce, self.nonce) {
            if prev != book_nonce {
                warn!(
                    symbol = %self.symbol,
                    expected = book_nonce,
                    actual = prev,
                    "Book sequence gap, discarding local book"
                );
                self.invalidate();
                return Err(StreamError::SequenceGap {
                    symbol: self.symbol.to_string(),
                    expected: book_nonce,
                    actual: prev,
                });
            }
        }

        self.apply_levels(&update);
        Ok(ApplyOutcome::Applied)
    }

    /// Returns the update back when the book is synced and it should be
    /// applied now.
    fn hold_unless_synced(&mut self, update: BookUpdate) -> Result<ApplyOutcome, BookUpdate> {
        if self.state == BookState::Synced {
            return Err(update);
        }
        match self.policy {
            DeltaPolicy::Discard => Ok(ApplyOutcome::Discarded),
            DeltaPolicy::Buffer { max } => {
                if self.pending.len() >= max {
                    warn!(
                        symbol = %self.symbol,
                        buffered = self.pending.len(),
                        "Pre-snapshot buffer full, dropping buffered deltas"
                    );
                    self.pending.clear();
                    self.overflowed = true;
                    return Ok(ApplyOutcome::Discarded);
                }
                self.pending.push_back(update);
                Ok(ApplyOutcome::Buffered)
            }
        }
    }

    fn apply_levels(&mut self, update: &BookUpdate) {
        for delta in &update.deltas {
            let levels = match delta.side {
                BookSide::Bids => &mut self.bids,
                BookSide::Asks => &mut self.asks,
            };
            if delta.size > Decimal::ZERO {
                levels.insert(delta.price, delta.size);
            } else {
                levels.remove(&delta.price);
            }
        }
        if update.nonce.is_some() {
            self.nonce = update.nonce;
        }
        if update.timestamp.is_some() {
            self.timestamp = update.timestamp;
        }
    }

    /// Best `depth` levels per side. Does not mutate the book.
    pub fn limit(&self, depth: usize) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            bids: self.top_bids(depth),
            asks: self.top_asks(depth),
            nonce: self.nonce,
            timestamp: self.timestamp,
        }
    }

    fn top_bids(&self, depth: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev() // Descending for bids (best bid = highest price)
            .take(depth)
            .map(|(price, size)| PriceLevel::new(*price, *size))
            .collect()
    }

    fn top_asks(&self, depth: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(depth)
            .map(|(price, size)| PriceLevel::new(*price, *size))
            .collect()
    }

    /// Local checksum over the best `top_n` levels.
    pub fn local_checksum(&self, strategy: &dyn ChecksumStrategy, top_n: usize) -> u32 {
        strategy.compute(&self.top_bids(top_n), &self.top_asks(top_n))
    }

    /// Compare the server checksum against the local book.
    ///
    /// On mismatch the book is discarded and returns to `Uninitialized`.
    pub fn verify_checksum(&mut self, strategy: &dyn ChecksumStrategy, server: i64, top_n: usize) -> bool {
        let local = self.local_checksum(strategy, top_n);
        if checksum_matches(server, local) {
            return true;
        }
        warn!(
            symbol = %self.symbol,
            strategy = strategy.name(),
            server = server as u32,
            local,
            "Book checksum mismatch, discarding local book"
        );
        self.invalidate();
        false
    }

    /// Discard all levels and buffered deltas; back to `Uninitialized`.
    pub fn invalidate(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.pending.clear();
        self.overflowed = false;
        self.nonce = None;
        self.timestamp = None;
        self.state = BookState::Uninitialized;
    }

    /// Get the current best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Get the current best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Number of bid price levels.
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask price levels.
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == BookState::Synced
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    /// Deltas waiting for the snapshot.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
