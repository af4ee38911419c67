//! Bounded, insertion-ordered record buffer
//!
//! The rolling window behind trade and fill streams: appends go to the tail,
//! the head is evicted once capacity is reached. Reads go through
//! [`OrderedView`], a lazy point-in-time iterator filtered by timestamp,
//! symbol and a tail limit.
//!
//! Each buffer also counts records that arrived since the last
//! [`BoundedSequence::take_new_updates`] call so a watcher can be handed only
//! what is new to it.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;

use types::ids::Symbol;
use types::record::Timestamped;

/// Read filter shared by every cache's ordered view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    /// Minimum timestamp (inclusive).
    pub since: Option<i64>,
    /// Keep only the most recent `limit` matching records.
    pub limit: Option<usize>,
    /// Keep only records for this symbol.
    pub symbol: Option<Symbol>,
}

impl ViewFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = Some(symbol);
        self
    }

    fn matches<R: Timestamped>(&self, record: &R) -> bool {
        if let Some(since) = self.since {
            if record.timestamp() < since {
                return false;
            }
        }
        match &self.symbol {
            Some(symbol) => record.symbol() == symbol,
            None => true,
        }
    }
}

/// Lazy, finite view over a cache in storage order.
///
/// Borrowing the cache freezes it for the lifetime of the view, so the view
/// is a consistent snapshot. It is consumed by iteration and cannot be
/// restarted; build a new one to read again.
pub struct OrderedView<'a, R, I> {
    inner: I,
    filter: ViewFilter,
    to_skip: usize,
    remaining: usize,
    _records: PhantomData<&'a R>,
}

impl<'a, R, I> OrderedView<'a, R, I>
where
    R: Timestamped + 'a,
    I: Iterator<Item = &'a R> + Clone,
{
    /// Build a view; a counting pass sizes the tail limit without allocating.
    pub(crate) fn new(inner: I, filter: ViewFilter) -> Self {
        let matching = inner.clone().filter(|r| filter.matches(*r)).count();
        let remaining = filter.limit.map_or(matching, |limit| limit.min(matching));
        Self {
            inner,
            to_skip: matching - remaining,
            remaining,
            filter,
            _records: PhantomData,
        }
    }
}

impl<'a, R, I> Iterator for OrderedView<'a, R, I>
where
    R: Timestamped + 'a,
    I: Iterator<Item = &'a R>,
{
    type Item = &'a R;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let record = self.inner.next()?;
            if !self.filter.matches(record) {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            self.remaining -= 1;
            return Some(record);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Counts records that arrived since a watcher last consumed the cache.
#[derive(Debug, Clone, Default)]
pub(crate) struct NewUpdates {
    by_symbol: HashMap<Symbol, usize>,
    total: usize,
}

impl NewUpdates {
    pub(crate) fn record(&mut self, symbol: &Symbol, cap: usize) {
        let count = self.by_symbol.entry(symbol.clone()).or_insert(0);
        *count = (*count + 1).min(cap);
        self.total = (self.total + 1).min(cap);
    }

    pub(crate) fn take(&mut self, symbol: Option<&Symbol>) -> usize {
        match symbol {
            Some(symbol) => {
                let taken = self.by_symbol.remove(symbol).unwrap_or(0);
                self.total = self.total.saturating_sub(taken);
                taken
            }
            None => {
                self.by_symbol.clear();
                std::mem::take(&mut self.total)
            }
        }
    }
}

/// Fixed-capacity, insertion-ordered buffer with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct BoundedSequence<R> {
    records: VecDeque<R>,
    capacity: usize,
    new_updates: NewUpdates,
}

impl<R: Timestamped> BoundedSequence<R> {
    /// Create a buffer holding at most `capacity` records.
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            new_updates: NewUpdates::default(),
        }
    }

    /// Append at the tail, evicting the head once over capacity.
    ///
    /// Returns the evicted record, if any.
    pub fn append(&mut self, record: R) -> Option<R> {
        self.new_updates.record(record.symbol(), self.capacity);
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.records.pop_front()
        } else {
            None
        }
    }

    /// Append every record in order.
    pub fn extend<T: IntoIterator<Item = R>>(&mut self, records: T) {
        for record in records {
            self.append(record);
        }
    }

    /// Point-in-time view in insertion order.
    pub fn to_ordered_view(
        &self,
        filter: ViewFilter,
    ) -> OrderedView<'_, R, std::collections::vec_deque::Iter<'_, R>> {
        OrderedView::new(self.records.iter(), filter)
    }

    /// Number of records appended since the last call (per symbol when
    /// given), capped at capacity. Resets the counter it reads.
    pub fn take_new_updates(&mut self, symbol: Option<&Symbol>) -> usize {
        self.new_updates.take(symbol)
    }

    /// Most recently appended record.
    pub fn latest(&self) -> Option<&R> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all records and pending update counts.
    pub fn clear(&mut self) {
        self.records.clear();
        self.new_updates = NewUpdates::default();
    }
}
