//! Time-bucketed bar series
//!
//! One entry per bucket, where the bucket key is `floor(timestamp / interval)`.
//! Venues push the forming candle repeatedly before it closes; an update for a
//! bucket already stored replaces (or merges into) that entry instead of
//! appending a duplicate.
//!
//! Entries are kept in bucket order. A late update for an older bucket that
//! is still retained lands in place; capacity eviction always drops the
//! oldest bucket.

use std::collections::{BTreeMap, BTreeSet};

use types::ohlcv::{Ohlcv, Timeframe};
use types::record::Timestamped;

use crate::sequence::{OrderedView, ViewFilter};

/// Bounded series with at most one bar per time bucket.
#[derive(Debug, Clone)]
pub struct BucketedSeries<B = Ohlcv> {
    bars: BTreeMap<i64, B>,
    interval_millis: i64,
    capacity: usize,
    /// Retained buckets written since the last read.
    touched: BTreeSet<i64>,
}

impl BucketedSeries<Ohlcv> {
    /// Series bucketed by a candle timeframe.
    pub fn for_timeframe(timeframe: Timeframe, capacity: usize) -> Self {
        Self::new(timeframe.duration_millis(), capacity)
    }

    /// Fold a partial bar or single-trade bar into its bucket.
    pub fn merge_bar(&mut self, bar: Ohlcv) -> Option<Ohlcv> {
        self.upsert_with(bar, |current, update| current.merge(&update))
    }
}

impl<B: Timestamped> BucketedSeries<B> {
    /// Create a series with the given bucket width and capacity.
    ///
    /// Non-positive intervals are raised to one millisecond and a zero
    /// capacity to one bar.
    pub fn new(interval_millis: i64, capacity: usize) -> Self {
        Self {
            bars: BTreeMap::new(),
            interval_millis: interval_millis.max(1),
            capacity: capacity.max(1),
            touched: BTreeSet::new(),
        }
    }

    /// Bucket key for a timestamp.
    pub fn bucket_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.interval_millis)
    }

    /// Replace the bar for its bucket, or append a new bucket.
    ///
    /// Returns the bar evicted to make room, if any.
    pub fn upsert(&mut self, bar: B) -> Option<B> {
        self.upsert_with(bar, |current, update| *current = update)
    }

    /// Like [`upsert`](Self::upsert), but an existing bucket is combined
    /// with `merge(current, update)` instead of being replaced.
    pub fn upsert_with<F>(&mut self, bar: B, merge: F) -> Option<B>
    where
        F: FnOnce(&mut B, B),
    {
        let bucket = self.bucket_of(bar.timestamp());
        self.touched.insert(bucket);

        if let Some(current) = self.bars.get_mut(&bucket) {
            merge(current, bar);
            return None;
        }

        self.bars.insert(bucket, bar);
        if self.bars.len() > self.capacity {
            let (evicted_bucket, evicted) = self.bars.pop_first()?;
            self.touched.remove(&evicted_bucket);
            Some(evicted)
        } else {
            None
        }
    }

    /// Point-in-time view in bucket order.
    pub fn to_ordered_view(
        &self,
        filter: ViewFilter,
    ) -> OrderedView<'_, B, std::collections::btree_map::Values<'_, i64, B>> {
        OrderedView::new(self.bars.values(), filter)
    }

    /// Most recent bucket's bar.
    pub fn latest(&self) -> Option<&B> {
        self.bars.values().next_back()
    }

    /// Number of distinct retained buckets written since the last read.
    /// Resets the tracking.
    pub fn take_new_updates(&mut self) -> usize {
        let count = self.touched.len();
        self.touched.clear();
        count
    }

    /// Bars of the buckets written since the last read, in bucket order.
    /// Resets the tracking.
    pub fn take_touched(&mut self) -> Vec<B>
    where
        B: Clone,
    {
        let touched = std::mem::take(&mut self.touched);
        touched
            .iter()
            .filter_map(|bucket| self.bars.get(bucket).cloned())
            .collect()
    }

    pub fn interval_millis(&self) -> i64 {
        self.interval_millis
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use rust_decimal::Decimal;
    use types::ids::Symbol;

    // 2024-02-17 00:00:00 UTC
    const BASE_TS: i64 = 1_708_128_000_000;

    fn make_bar(ts: i64, close: i64, volume: i64) -> Ohlcv {
        Ohlcv {
            symbol: Symbol::new("BTC/USDT"),
            timeframe: Timeframe::M1,
            timestamp: Timeframe::M1.align_to_boundary(ts),
            open: Decimal::from(50000),
            high: Decimal::from(close.max(50000)),
            low: Decimal::from(close.min(50000)),
            close: Decimal::from(close),
            volume: Decimal::from(volume),
        }
    }

    #[test]
    fn test_same_bucket_replaces() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.upsert(make_bar(BASE_TS, 50100, 1));
        series.upsert(make_bar(BASE_TS + 30_000, 50200, 3));

        assert_eq!(series.len(), 1);
        let bar = series.latest().unwrap();
        assert_eq!(bar.close, Decimal::from(50200));
        assert_eq!(bar.volume, Decimal::from(3));
    }

    #[test]
    fn test_new_bucket_appends() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.upsert(make_bar(BASE_TS, 50100, 1));
        series.upsert(make_bar(BASE_TS + 60_000, 50200, 1));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_merge_bar_folds_ohlcv() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.merge_bar(make_bar(BASE_TS, 50100, 1));
        series.merge_bar(make_bar(BASE_TS + 10_000, 49900, 2));

        let bar = series.latest().unwrap();
        assert_eq!(bar.high, Decimal::from(50100));
        assert_eq!(bar.low, Decimal::from(49900));
        assert_eq!(bar.close, Decimal::from(49900));
        assert_eq!(bar.volume, Decimal::from(3));
        assert!(bar.is_valid());
    }

    #[test]
    fn test_evicts_oldest_bucket() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 2);
        series.upsert(make_bar(BASE_TS, 1, 1));
        series.upsert(make_bar(BASE_TS + 60_000, 2, 1));
        let evicted = series.upsert(make_bar(BASE_TS + 120_000, 3, 1));

        assert_eq!(evicted.map(|b| b.timestamp), Some(BASE_TS));
        let closes: Vec<_> = series
            .to_ordered_view(ViewFilter::new())
            .map(|b| b.close)
            .collect();
        assert_eq!(closes, vec![Decimal::from(2), Decimal::from(3)]);
    }

    #[test]
    fn test_late_update_lands_in_its_bucket() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.upsert(make_bar(BASE_TS, 1, 1));
        series.upsert(make_bar(BASE_TS + 60_000, 2, 1));
        series.upsert(make_bar(BASE_TS + 5_000, 7, 1));

        let closes: Vec<_> = series
            .to_ordered_view(ViewFilter::new())
            .map(|b| b.close)
            .collect();
        assert_eq!(closes, vec![Decimal::from(7), Decimal::from(2)]);
    }

    #[test]
    fn test_negative_timestamps_floor() {
        let series: BucketedSeries<Ohlcv> = BucketedSeries::new(60_000, 10);
        assert_eq!(series.bucket_of(-1), -1);
        assert_eq!(series.bucket_of(0), 0);
        assert_eq!(series.bucket_of(59_999), 0);
    }

    #[test]
    fn test_new_updates_counts_buckets() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.upsert(make_bar(BASE_TS, 1, 1));
        series.upsert(make_bar(BASE_TS + 1_000, 2, 1));
        series.upsert(make_bar(BASE_TS + 60_000, 3, 1));
        assert_eq!(series.take_new_updates(), 2);
        assert_eq!(series.take_new_updates(), 0);
    }

    #[test]
    fn test_take_touched_returns_late_bucket_only() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        series.upsert(make_bar(BASE_TS, 1, 1));
        series.upsert(make_bar(BASE_TS + 60_000, 2, 1));
        series.upsert(make_bar(BASE_TS + 120_000, 3, 1));
        assert_eq!(series.take_touched().len(), 3);

        series.upsert(make_bar(BASE_TS + 5_000, 99, 1));
        let touched = series.take_touched();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].timestamp, BASE_TS);
        assert_eq!(touched[0].close, Decimal::from(99));
        assert!(series.take_touched().is_empty());
    }

    #[test]
    fn test_touched_buckets_bounded_by_capacity() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 10);
        for i in 0..10_000 {
            series.upsert(make_bar(BASE_TS + i * 60_000, i, 1));
        }
        assert_eq!(series.len(), 10);

        let touched = series.take_touched();
        assert_eq!(touched.len(), 10);
        assert_eq!(touched[0].timestamp, BASE_TS + 9_990 * 60_000);
    }

    #[test]
    fn test_bar_older_than_retained_window_not_touched() {
        let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 2);
        series.upsert(make_bar(BASE_TS + 60_000, 1, 1));
        series.upsert(make_bar(BASE_TS + 120_000, 2, 1));
        series.take_touched();

        let evicted = series.upsert(make_bar(BASE_TS, 3, 1));
        assert_eq!(evicted.map(|b| b.timestamp), Some(BASE_TS));
        assert!(series.take_touched().is_empty());
    }

    proptest! {
        #[test]
        fn prop_one_bar_per_bucket(offsets in proptest::collection::vec(0i64..600_000, 1..64)) {
            let mut series = BucketedSeries::for_timeframe(Timeframe::M1, 100);
            for (i, offset) in offsets.iter().enumerate() {
                series.upsert(make_bar(BASE_TS + offset, i as i64, 1));
            }

            let buckets: HashSet<i64> = offsets.iter().map(|o| (BASE_TS + o) / 60_000).collect();
            prop_assert_eq!(series.len(), buckets.len());

            let stamps: Vec<i64> = series.to_ordered_view(ViewFilter::new()).map(|b| b.timestamp).collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
