//! Per-venue connection profile
//!
//! Everything that differs between venues at the connection level, as
//! data: the handler table, how liveness is checked, and whether the
//! connection must be authenticated.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::auth::Authenticator;
use crate::dispatch::Dispatcher;
use crate::transport::WireFrame;

/// How the venue expects liveness to be checked.
#[derive(Debug, Clone, PartialEq)]
pub enum PingStyle {
    /// Websocket ping control frames, answered with pong frames.
    Protocol,
    /// Literal text frames, e.g. `"ping"` answered by `"pong"`.
    Text { ping: String, pong: String },
    /// JSON frames; the answer is recognized by its channel name.
    Json { ping: Value, pong_channel: String },
    /// No pings sent; any inbound frame counts as a sign of life.
    Passive,
}

impl PingStyle {
    pub fn text(ping: impl Into<String>, pong: impl Into<String>) -> Self {
        PingStyle::Text {
            ping: ping.into(),
            pong: pong.into(),
        }
    }

    /// Frame to send on each heartbeat tick.
    pub fn ping_frame(&self) -> Option<WireFrame> {
        match self {
            PingStyle::Protocol => Some(WireFrame::Ping(Vec::new())),
            PingStyle::Text { ping, .. } => Some(WireFrame::Text(ping.clone())),
            PingStyle::Json { ping, .. } => Some(WireFrame::Text(ping.to_string())),
            PingStyle::Passive => None,
        }
    }

    /// Whether a raw text frame is the venue's pong.
    pub fn is_pong_text(&self, text: &str) -> bool {
        matches!(self, PingStyle::Text { pong, .. } if pong == text)
    }

    /// Whether a dispatched frame's channel is the venue's pong.
    pub fn is_pong_channel(&self, channel: Option<&str>) -> bool {
        match (self, channel) {
            (PingStyle::Json { pong_channel, .. }, Some(channel)) => pong_channel == channel,
            _ => false,
        }
    }
}

/// Connection-level behavior of one venue.
pub struct VenueProfile<S, V> {
    pub name: String,
    pub dispatcher: Dispatcher<S, V>,
    pub ping: PingStyle,
    /// Present when the connection carries private channels.
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl<S, V> VenueProfile<S, V> {
    pub fn new(name: impl Into<String>, dispatcher: Dispatcher<S, V>) -> Self {
        Self {
            name: name.into(),
            dispatcher,
            ping: PingStyle::Protocol,
            authenticator: None,
        }
    }

    pub fn with_ping(mut self, ping: PingStyle) -> Self {
        self.ping = ping;
        self
    }

    /// Mark the connection private; it authenticates before connecting.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn is_private(&self) -> bool {
        self.authenticator.is_some()
    }
}

impl<S, V> fmt::Debug for VenueProfile<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueProfile")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .field("ping", &self.ping)
            .field("private", &self.is_private())
            .finish()
    }
}
