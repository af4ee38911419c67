//! Order book checksum strategies
//!
//! Venues publish a CRC32 over a canonical rendering of their top-of-book so
//! clients can detect a corrupted local mirror. The rendering differs per
//! venue (which side first, separators, number formatting); the digest is
//! IEEE CRC32 everywhere we have seen it.
//!
//! Strategies receive levels best-first, already truncated to `top_n`.
//! Server checksums arrive signed on some venues and unsigned on others, so
//! comparison happens on the low 32 bits.

use std::fmt;

use rust_decimal::Decimal;
use types::numeric::canonical_string;

use crate::book::PriceLevel;

/// Venue-specific canonical rendering plus digest.
pub trait ChecksumStrategy: Send + Sync + fmt::Debug {
    /// Short name for log fields.
    fn name(&self) -> &'static str;

    /// Canonical string the venue hashes.
    fn payload(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> String;

    /// Digest of the canonical string.
    fn digest(&self, payload: &str) -> u32 {
        crc32fast::hash(payload.as_bytes())
    }

    fn compute(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> u32 {
        self.digest(&self.payload(bids, asks))
    }
}

/// Compare a server-reported checksum with a local one on the low 32 bits.
pub fn checksum_matches(server: i64, local: u32) -> bool {
    server as u32 == local
}

fn push_level(tokens: &mut Vec<String>, level: &PriceLevel) {
    tokens.push(canonical_string(level.price));
    tokens.push(canonical_string(level.size));
}

/// All bids then all asks, `price:size` tokens joined by `:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialCrc32;

impl ChecksumStrategy for SequentialCrc32 {
    fn name(&self) -> &'static str {
        "sequential_crc32"
    }

    fn payload(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> String {
        let mut tokens = Vec::with_capacity((bids.len() + asks.len()) * 2);
        for level in bids.iter().chain(asks) {
            push_level(&mut tokens, level);
        }
        tokens.join(":")
    }
}

/// Bid i then ask i for each depth index, joined by `:`.
///
/// When one side is shorter the other side's remaining levels still
/// appear in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterleavedCrc32;

impl ChecksumStrategy for InterleavedCrc32 {
    fn name(&self) -> &'static str {
        "interleaved_crc32"
    }

    fn payload(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> String {
        let mut tokens = Vec::with_capacity((bids.len() + asks.len()) * 2);
        for i in 0..bids.len().max(asks.len()) {
            if let Some(bid) = bids.get(i) {
                push_level(&mut tokens, bid);
            }
            if let Some(ask) = asks.get(i) {
                push_level(&mut tokens, ask);
            }
        }
        tokens.join(":")
    }
}

/// Asks then bids, each number with its decimal point and leading zeros
/// removed, concatenated without separators.
///
/// Venues using this form hash numbers at the pair's fixed precision, so
/// the scales can be pinned; `None` renders the normalized value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCrc32 {
    pub price_scale: Option<u32>,
    pub size_scale: Option<u32>,
}

impl CompactCrc32 {
    pub fn with_scales(price_scale: u32, size_scale: u32) -> Self {
        Self {
            price_scale: Some(price_scale),
            size_scale: Some(size_scale),
        }
    }

    fn format(value: Decimal, scale: Option<u32>) -> String {
        let rendered = match scale {
            Some(scale) => {
                let mut fixed = value;
                fixed.rescale(scale);
                fixed.to_string()
            }
            None => canonical_string(value),
        };
        rendered
            .replace('.', "")
            .trim_start_matches('0')
            .to_string()
    }
}

impl ChecksumStrategy for CompactCrc32 {
    fn name(&self) -> &'static str {
        "compact_crc32"
    }

    fn payload(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> String {
        asks.iter()
            .chain(bids)
            .map(|level| {
                let mut token = Self::format(level.price, self.price_scale);
                token.push_str(&Self::format(level.size, self.size_scale));
                token
            })
            .collect()
    }
}
