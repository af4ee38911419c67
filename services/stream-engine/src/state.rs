//! Per-connection market state
//!
//! `MarketState` owns every cache a connection feeds: one book and one trade
//! buffer per symbol, one bar series per (symbol, timeframe), and the keyed
//! order and position caches. Handlers call its operations with the router
//! so that a cache mutation and the resolution of the matching key happen
//! in the same unit of work.
//!
//! Watchers receive only what is new to them: record streams resolve with
//! the records that arrived since the last delivery, books with a depth
//! limited view.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use types::ids::Symbol;
use types::ohlcv::{Ohlcv, Timeframe};
use types::order::Order;
use types::position::Position;
use types::record::Keyed;
use types::trade::Trade;

use crate::book::{ApplyOutcome, BookSnapshot, BookUpdate, BookView, DeltaPolicy, PriceLevelBook};
use crate::bucketed::BucketedSeries;
use crate::checksum::{ChecksumStrategy, SequentialCrc32};
use crate::config::{CacheLimits, StreamConfig};
use crate::error::StreamError;
use crate::keyed::KeyedRecentCache;
use crate::router::SubscriptionRouter;
use crate::sequence::{BoundedSequence, ViewFilter};

/// Value handed to watchers of a market-state connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum StreamUpdate {
    Book(BookView),
    Trades(Vec<Trade>),
    Orders(Vec<Order>),
    Positions(Vec<Position>),
    Ohlcv(Vec<Ohlcv>),
}

/// Connection-scoped state the supervisor resets on reconnect.
pub trait SessionState: Send + 'static {
    /// Called after the transport was lost and before the next connect.
    fn on_reconnect(&mut self);
}

/// Caches for one venue connection.
#[derive(Debug)]
pub struct MarketState {
    limits: CacheLimits,
    delta_policy: DeltaPolicy,
    book_depth: usize,
    checksum_enabled: bool,
    checksum: Arc<dyn ChecksumStrategy>,
    checksum_depth: usize,
    books: HashMap<Symbol, PriceLevelBook>,
    trades: HashMap<Symbol, BoundedSequence<Trade>>,
    ohlcv: HashMap<(Symbol, Timeframe), BucketedSeries<Ohlcv>>,
    orders: KeyedRecentCache<Order>,
    positions: KeyedRecentCache<Position>,
}

impl MarketState {
    /// State sized from the connection config, checking the best 25 levels
    /// per side with [`SequentialCrc32`].
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            limits: config.cache.clone(),
            delta_policy: config.delta_policy,
            book_depth: config.book_depth,
            checksum_enabled: config.checksum,
            checksum: Arc::new(SequentialCrc32),
            checksum_depth: 25,
            books: HashMap::new(),
            trades: HashMap::new(),
            ohlcv: HashMap::new(),
            orders: KeyedRecentCache::new(config.cache.orders),
            positions: KeyedRecentCache::new(config.cache.positions),
        }
    }

    /// Use a venue's checksum convention over its best `top_n` levels.
    pub fn with_checksum(mut self, strategy: Arc<dyn ChecksumStrategy>, top_n: usize) -> Self {
        self.checksum = strategy;
        self.checksum_depth = top_n;
        self
    }

    fn book_entry(&mut self, symbol: &Symbol) -> &mut PriceLevelBook {
        let policy = self.delta_policy;
        let book = self
            .books
            .entry(symbol.clone())
            .or_insert_with(|| PriceLevelBook::new(symbol.clone(), policy));
        book.await_snapshot();
        book
    }

    fn wants_checksum(&self, router: &SubscriptionRouter<StreamUpdate>, key: &str) -> bool {
        self.checksum_enabled && router.meta(key).is_some_and(|meta| meta.checksum)
    }

    /// Discard the book and fail its subscription so the caller resubscribes.
    fn tear_down_book(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: &Symbol,
        error: StreamError,
    ) {
        match &error {
            StreamError::Checksum { .. } => router.metrics().record_checksum_failure(),
            StreamError::SequenceGap { .. } => router.metrics().record_sequence_gap(),
            _ => {}
        }
        self.books.remove(symbol);
        router.reject(key, error);
    }

    /// Verify a server checksum on a synced book; tears down on mismatch.
    fn check_book(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: &Symbol,
        server: Option<i64>,
    ) -> bool {
        let Some(server) = server else {
            return true;
        };
        if !self.wants_checksum(router, key) {
            return true;
        }
        let strategy = Arc::clone(&self.checksum);
        let depth = self.checksum_depth;
        let Some(book) = self.books.get_mut(symbol) else {
            return true;
        };
        if !book.is_synced() {
            return true;
        }
        let local = book.local_checksum(strategy.as_ref(), depth);
        if book.verify_checksum(strategy.as_ref(), server, depth) {
            return true;
        }
        let error = StreamError::Checksum {
            symbol: symbol.to_string(),
            expected: server as u32,
            actual: local,
        };
        self.tear_down_book(router, key, symbol, error);
        false
    }

    fn resolve_book(&self, router: &mut SubscriptionRouter<StreamUpdate>, key: &str, symbol: &Symbol) {
        if !router.has_waiters(key) {
            return;
        }
        if let Some(book) = self.books.get(symbol) {
            let depth = router
                .meta(key)
                .and_then(|meta| meta.limit)
                .unwrap_or(self.book_depth);
            router.resolve(key, StreamUpdate::Book(book.limit(depth)));
        }
    }

    /// Replace a book from a snapshot, verify it, and resolve `key`.
    ///
    /// Buffered deltas that do not chain from the snapshot tear the book
    /// down like a sequence gap on a live update.
    pub fn apply_book_snapshot(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: &Symbol,
        snapshot: BookSnapshot,
        checksum: Option<i64>,
    ) {
        let replayed = match self.book_entry(symbol).reset(snapshot) {
            Ok(replayed) => replayed,
            Err(error) => {
                self.tear_down_book(router, key, symbol, error);
                return;
            }
        };
        if let Some(meta) = router.meta_mut(key) {
            meta.snapshot_received = true;
        }
        debug!(key, symbol = %symbol, replayed, "Book synced");
        if self.check_book(router, key, symbol, checksum) {
            self.resolve_book(router, key, symbol);
        }
    }

    /// Apply an incremental book message, verify it, and resolve `key`.
    ///
    /// Sequence gaps and checksum mismatches discard the book and reject
    /// the subscription; they are not returned as errors because the
    /// subscriber has already been told.
    pub fn apply_book_update(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: &Symbol,
        update: BookUpdate,
        checksum: Option<i64>,
    ) -> ApplyOutcome {
        let outcome = match self.book_entry(symbol).apply_update(update) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.tear_down_book(router, key, symbol, error);
                return ApplyOutcome::Discarded;
            }
        };
        if outcome != ApplyOutcome::Applied {
            return outcome;
        }
        if !self.check_book(router, key, symbol, checksum) {
            return ApplyOutcome::Discarded;
        }
        self.resolve_book(router, key, symbol);
        outcome
    }

    /// Append public trades and resolve `key` with the ones new to its
    /// watchers.
    pub fn push_trades(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: &Symbol,
        trades: Vec<Trade>,
    ) {
        let capacity = self.limits.trades;
        let cache = self
            .trades
            .entry(symbol.clone())
            .or_insert_with(|| BoundedSequence::new(capacity));
        cache.extend(trades);

        if router.has_waiters(key) {
            let fresh = cache.take_new_updates(Some(symbol));
            let records = cache
                .to_ordered_view(ViewFilter::new().symbol(symbol.clone()).limit(fresh))
                .cloned()
                .collect();
            router.resolve(key, StreamUpdate::Trades(records));
        }
    }

    /// Upsert order updates and resolve `key` with the orders changed since
    /// its watchers' last delivery, optionally scoped to one symbol.
    pub fn upsert_orders(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: Option<&Symbol>,
        orders: Vec<Order>,
    ) {
        for order in orders {
            self.orders.upsert(order);
        }
        if router.has_waiters(key) {
            let records = Self::fresh_records(&mut self.orders, symbol);
            router.resolve(key, StreamUpdate::Orders(records));
        }
    }

    /// Upsert positions by (symbol, side) and resolve `key`.
    pub fn upsert_positions(
        &mut self,
        router: &mut SubscriptionRouter<StreamUpdate>,
        key: &str,
        symbol: Option<&Symbol>,
        positions: Vec<Position>,
    ) {
        for position in positions {
            self.positions.upsert(position);
        }
        if router.has_waiters(key) {
            let records = Self::fresh_records(&mut self.positions, symbol);
            router.resolve(key, StreamUpdate::Positions(records));
        }
    }

    fn fresh_records<R: Keyed + Clone>(cache: &mut KeyedRecentCache<R>, symbol: Option<&Symbol>) -> Vec<R> {
        let fresh = cache.take_new_updates(symbol);
        let mut filter = ViewFilter::new().limit(fresh);
        filter.symbol = symbol.cloned();
        cache.to_ordered_view(filter).cloned().collect()
    }

    /// Store bars (replacing the forming bar of each bucket) and resolve
    /// `key` with the bars touched since the last delivery.
    pub fn upsert_ohlcv(&mut self, router: &mut SubscriptionRouter<StreamUpdate>, key: &str, bars: Vec<Ohlcv>) {
        let capacity = self.limits.ohlcv;
        let mut touched: Vec<(Symbol, Timeframe)> = Vec::new();
        for bar in bars {
            let series_key = (bar.symbol.clone(), bar.timeframe);
            if !touched.contains(&series_key) {
                touched.push(series_key.clone());
            }
            self.ohlcv
                .entry(series_key)
                .or_insert_with(|| BucketedSeries::for_timeframe(bar.timeframe, capacity))
                .upsert(bar);
        }

        if !router.has_waiters(key) {
            return;
        }
        let mut records = Vec::new();
        for series_key in &touched {
            if let Some(series) = self.ohlcv.get_mut(series_key) {
                records.extend(series.take_touched());
            }
        }
        router.resolve(key, StreamUpdate::Ohlcv(records));
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&PriceLevelBook> {
        self.books.get(symbol)
    }

    pub fn trades(&self, symbol: &Symbol) -> Option<&BoundedSequence<Trade>> {
        self.trades.get(symbol)
    }

    pub fn ohlcv(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&BucketedSeries<Ohlcv>> {
        self.ohlcv.get(&(symbol.clone(), timeframe))
    }

    pub fn orders(&self) -> &KeyedRecentCache<Order> {
        &self.orders
    }

    pub fn positions(&self) -> &KeyedRecentCache<Position> {
        &self.positions
    }
}

impl SessionState for MarketState {
    /// Books lose sync; record caches survive the reconnect.
    fn on_reconnect(&mut self) {
        for book in self.books.values_mut() {
            book.invalidate();
        }
        info!(books = self.books.len(), "Market state reset for reconnect");
    }
}
