//! Latest-state-by-identity record cache
//!
//! Order and position streams repeat the same identity across lifecycle
//! states. The cache keeps only the latest record per key, moves an updated
//! record to the most-recent position, and evicts by recency.
//!
//! Records are stored in a `BTreeMap` keyed by an insertion sequence so
//! moving an entry to the tail and evicting the head are both logarithmic.
//! The identity index always points at the live sequence of its record.

use std::collections::{BTreeMap, HashMap, HashSet};

use types::ids::Symbol;
use types::record::Keyed;

use crate::sequence::{OrderedView, ViewFilter};

/// Distinct identities touched per symbol since the last read.
///
/// Keys leave the set when their record leaves the cache and the unkeyed
/// count saturates at capacity, so tracking never outgrows the cache.
#[derive(Debug, Clone)]
struct TouchedKeys<K> {
    by_symbol: HashMap<Symbol, (HashSet<K>, usize)>,
}

impl<K: Eq + std::hash::Hash> TouchedKeys<K> {
    fn new() -> Self {
        Self {
            by_symbol: HashMap::new(),
        }
    }

    fn touch(&mut self, symbol: &Symbol, key: Option<K>, cap: usize) {
        let (keys, unkeyed) = self.by_symbol.entry(symbol.clone()).or_default();
        match key {
            Some(key) => {
                keys.insert(key);
            }
            None => *unkeyed = (*unkeyed + 1).min(cap),
        }
    }

    fn forget(&mut self, symbol: &Symbol, key: &K) {
        if let Some((keys, unkeyed)) = self.by_symbol.get_mut(symbol) {
            keys.remove(key);
            if keys.is_empty() && *unkeyed == 0 {
                self.by_symbol.remove(symbol);
            }
        }
    }

    fn take(&mut self, symbol: Option<&Symbol>, cap: usize) -> usize {
        let count = match symbol {
            Some(symbol) => self
                .by_symbol
                .remove(symbol)
                .map_or(0, |(keys, unkeyed)| keys.len() + unkeyed),
            None => self
                .by_symbol
                .drain()
                .map(|(_, (keys, unkeyed))| keys.len() + unkeyed)
                .sum(),
        };
        count.min(cap)
    }

    fn len(&self) -> usize {
        self.by_symbol
            .values()
            .map(|(keys, unkeyed)| keys.len() + unkeyed)
            .sum()
    }
}

/// Bounded cache holding the latest record per identity.
#[derive(Debug, Clone)]
pub struct KeyedRecentCache<R: Keyed> {
    entries: BTreeMap<u64, R>,
    index: HashMap<R::Key, u64>,
    next_seq: u64,
    capacity: usize,
    touched: TouchedKeys<R::Key>,
}

impl<R: Keyed> KeyedRecentCache<R> {
    /// Create a cache holding at most `capacity` records.
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            touched: TouchedKeys::new(),
        }
    }

    /// Insert or replace by identity.
    ///
    /// An existing record with the same key is replaced and moved to the
    /// tail. Records without a key are appended as-is. Returns the record
    /// evicted to make room, if any.
    pub fn upsert(&mut self, record: R) -> Option<R> {
        let key = record.key();
        self.touched.touch(record.symbol(), key.clone(), self.capacity);

        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(key) = key {
            if let Some(previous) = self.index.insert(key, seq) {
                self.entries.remove(&previous);
            }
        }
        self.entries.insert(seq, record);

        if self.entries.len() > self.capacity {
            self.evict_oldest()
        } else {
            None
        }
    }

    fn evict_oldest(&mut self) -> Option<R> {
        let (seq, evicted) = self.entries.pop_first()?;
        if let Some(key) = evicted.key() {
            if self.index.get(&key) == Some(&seq) {
                self.index.remove(&key);
                self.touched.forget(evicted.symbol(), &key);
            }
        }
        Some(evicted)
    }

    /// Look up the latest record for an identity.
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.index.get(key).and_then(|seq| self.entries.get(seq))
    }

    /// Remove a record by identity.
    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        let seq = self.index.remove(key)?;
        let removed = self.entries.remove(&seq)?;
        self.touched.forget(removed.symbol(), key);
        Some(removed)
    }

    /// Point-in-time view, least recently updated first.
    pub fn to_ordered_view(
        &self,
        filter: ViewFilter,
    ) -> OrderedView<'_, R, std::collections::btree_map::Values<'_, u64, R>> {
        OrderedView::new(self.entries.values(), filter)
    }

    /// Number of distinct identities updated since the last call (per
    /// symbol when given), capped at capacity. Resets the counter it reads.
    pub fn take_new_updates(&mut self, symbol: Option<&Symbol>) -> usize {
        self.touched.take(symbol, self.capacity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Identities (plus unkeyed records) awaiting the next
    /// [`take_new_updates`](Self::take_new_updates).
    pub fn pending_updates(&self) -> usize {
        self.touched.len()
    }
}
