//! Traits the engine's caches are generic over
//!
//! Every cached record has a timestamp (Unix milliseconds, venue clock) and a
//! symbol. Records that can be updated in place also expose an identity key.

use std::hash::Hash;

use crate::ids::Symbol;

/// A record with a venue timestamp and a symbol.
pub trait Timestamped {
    /// Unix milliseconds. Not guaranteed to be ordered on arrival.
    fn timestamp(&self) -> i64;

    /// Symbol the record belongs to.
    fn symbol(&self) -> &Symbol;
}

/// A record with an identity that later updates may replace.
pub trait Keyed: Timestamped {
    /// Identity type, e.g. `(Symbol, String)` for orders.
    type Key: Eq + Hash + Clone;

    /// `None` when the venue omitted the identifier; such records are never
    /// deduplicated.
    fn key(&self) -> Option<Self::Key>;
}
