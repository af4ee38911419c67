//! Connection and cache configuration
//!
//! In-process values only. Both structs implement `Deserialize` with field
//! defaults so an embedding application can load partial overrides from any
//! serde format. Durations are expressed in milliseconds when serialized.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::book::DeltaPolicy;
use crate::error::StreamError;

/// Serde adapter: `Duration` as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Capacities of the per-connection record caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Trades retained per symbol.
    pub trades: usize,
    /// Orders retained across symbols.
    pub orders: usize,
    /// Bars retained per (symbol, timeframe).
    pub ohlcv: usize,
    /// Positions retained across symbols.
    pub positions: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            trades: 1_000,
            orders: 1_000,
            ohlcv: 1_000,
            positions: 1_000,
        }
    }
}

/// Configuration for one venue connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Deadline for connect plus handshake (default: 10s).
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Ping cadence (default: 20s).
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead (default: 60s).
    #[serde(with = "duration_millis")]
    pub liveness_timeout: Duration,
    /// First reconnect delay (default: 500ms), doubled per failure.
    #[serde(with = "duration_millis")]
    pub reconnect_backoff_initial: Duration,
    /// Reconnect delay cap (default: 30s).
    #[serde(with = "duration_millis")]
    pub reconnect_backoff_max: Duration,
    /// Capacity of the handle → connection command channel.
    pub command_buffer: usize,
    /// Verify order book checksums when the venue sends them.
    pub checksum: bool,
    /// Handling of book deltas that arrive before the snapshot.
    pub delta_policy: DeltaPolicy,
    /// Levels per side handed to book watchers.
    pub book_depth: usize,
    pub cache: CacheLimits,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(20),
            liveness_timeout: Duration::from_secs(60),
            reconnect_backoff_initial: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(30),
            command_buffer: 256,
            checksum: true,
            delta_policy: DeltaPolicy::default(),
            book_depth: 100,
            cache: CacheLimits::default(),
        }
    }
}

impl StreamConfig {
    /// Config pointed at `url` with defaults for everything else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reject values the connection cannot run with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(StreamError::Config(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(StreamError::Config("heartbeat_interval must be non-zero".into()));
        }
        if self.liveness_timeout <= self.heartbeat_interval {
            return Err(StreamError::Config(format!(
                "liveness_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                self.liveness_timeout, self.heartbeat_interval
            )));
        }
        if self.reconnect_backoff_initial.is_zero()
            || self.reconnect_backoff_initial > self.reconnect_backoff_max
        {
            return Err(StreamError::Config(
                "reconnect backoff must satisfy 0 < initial <= max".into(),
            ));
        }
        if self.command_buffer == 0 || self.book_depth == 0 {
            return Err(StreamError::Config(
                "command_buffer and book_depth must be non-zero".into(),
            ));
        }
        if let DeltaPolicy::Buffer { max: 0 } = self.delta_policy {
            return Err(StreamError::Config("delta buffer max must be non-zero".into()));
        }
        let cache = &self.cache;
        if cache.trades == 0 || cache.orders == 0 || cache.ohlcv == 0 || cache.positions == 0 {
            return Err(StreamError::Config("cache capacities must be non-zero".into()));
        }
        Ok(())
    }
}
