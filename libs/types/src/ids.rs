//! Identifier types for streamed records
//!
//! Symbols are unified `BASE/QUOTE` strings (optionally with a `:SETTLE`
//! suffix for contracts). Record ids are whatever the venue sends, so they
//! stay plain strings on the records themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TypeError;

/// Unified market symbol
///
/// Format: "BASE/QUOTE" (e.g., "BTC/USDT") or "BASE/QUOTE:SETTLE" for
/// contracts (e.g., "BTC/USDT:USDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Wrap a symbol string without validation.
    ///
    /// Adapters resolve symbols from market metadata they already trust.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Parse a symbol, rejecting strings without a `BASE/QUOTE` pair
    pub fn parse(symbol: impl Into<String>) -> Result<Self, TypeError> {
        let s = symbol.into();
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self(s)),
            _ => Err(TypeError::InvalidSymbol(s)),
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base and quote assets (settle suffix dropped)
    pub fn split(&self) -> Option<(&str, &str)> {
        let (base, rest) = self.0.split_once('/')?;
        let quote = rest.split(':').next().unwrap_or(rest);
        Some((base, quote))
    }

    /// Settlement asset for contract symbols
    pub fn settle(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, settle)| settle)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}
