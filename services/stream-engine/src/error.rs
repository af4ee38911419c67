//! Error taxonomy for the streaming engine
//!
//! Cache operations never fail on ordinary data variance; only protocol,
//! integrity and transport problems surface here. Errors are `Clone` because
//! a single rejection completes every waiter attached to a message key.

use thiserror::Error;

/// Every way a watched stream can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Malformed frame. Logged and dropped; the connection continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// The venue refused a subscribe or reported a logical failure.
    #[error("protocol error on {key}: {message}")]
    Protocol { key: String, message: String },

    /// Order book integrity check failed; local book discarded.
    #[error("checksum mismatch for {symbol}: server {expected}, local {actual}")]
    Checksum {
        symbol: String,
        expected: u32,
        actual: u32,
    },

    /// Delta does not continue the book's sequence; local book discarded.
    #[error("sequence gap for {symbol}: expected {expected}, got {actual}")]
    SequenceGap {
        symbol: String,
        expected: u64,
        actual: u64,
    },

    /// Credentials rejected; all private subscriptions on the connection fail.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transport dropped or liveness lost.
    #[error("connection error: {reason}")]
    Connection { reason: String, retryable: bool },

    /// Connect or handshake exceeded its deadline.
    #[error("timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// The subscription was cancelled by `unwatch` or shutdown.
    #[error("subscription cancelled: {0}")]
    Cancelled(String),

    /// Invalid in-process configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    /// Shorthand for a retryable transport failure.
    pub fn connection(reason: impl Into<String>) -> Self {
        StreamError::Connection {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Whether resubscribing is expected to succeed.
    ///
    /// Checksum and sequence failures are retryable: a fresh subscribe
    /// brings a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { retryable, .. } => *retryable,
            StreamError::Checksum { .. }
            | StreamError::SequenceGap { .. }
            | StreamError::Timeout { .. } => true,
            StreamError::Decode(_)
            | StreamError::Protocol { .. }
            | StreamError::Authentication(_)
            | StreamError::Cancelled(_)
            | StreamError::Config(_) => false,
        }
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Decode(_) => "decode",
            StreamError::Protocol { .. } => "protocol",
            StreamError::Checksum { .. } => "checksum",
            StreamError::SequenceGap { .. } => "sequence_gap",
            StreamError::Authentication(_) => "authentication",
            StreamError::Connection { .. } => "connection",
            StreamError::Timeout { .. } => "timeout",
            StreamError::Cancelled(_) => "cancelled",
            StreamError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Decode(err.to_string())
    }
}

impl From<types::errors::TypeError> for StreamError {
    fn from(err: types::errors::TypeError) -> Self {
        StreamError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_error_display() {
        let err = StreamError::Checksum {
            symbol: "BTC/USDT".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("BTC/USDT"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "checksum");
    }

    #[test]
    fn test_connection_error_retryable() {
        assert!(StreamError::connection("socket closed").is_retryable());
        let fatal = StreamError::Connection {
            reason: "shutdown".to_string(),
            retryable: false,
        };
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_protocol_error_not_retryable() {
        let err = StreamError::Protocol {
            key: "trades:ETH/USD".to_string(),
            message: "unknown channel".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "protocol error on trades:ETH/USD: unknown channel");
    }

    #[test]
    fn test_from_json_error() {
        let err: StreamError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, StreamError::Decode(_)));
    }
}
