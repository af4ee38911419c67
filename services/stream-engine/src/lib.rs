//! Stream Engine
//!
//! Venue-neutral core for exchange websocket adapters:
//! - Bounded record caches (trades, orders, positions, OHLCV bars)
//! - Price-level order books with sequence and checksum validation
//! - Subscription routing: many watchers, one subscribe frame per key
//! - One supervised task per connection (heartbeat, liveness, reconnect)
//!
//! Adapters describe a venue as data ([`VenueProfile`]): channel
//! extraction, frame handlers, ping style and an optional authenticator.
//!
//! # Architecture
//!
//! ```text
//!  watch(key) ──► ConnectionHandle
//!                     │ commands
//!                 ┌───▼────────┐   frames   ┌──────────┐
//!                 │ Supervisor │◄──────────►│Connector │
//!                 └───┬────────┘            └──────────┘
//!                     │ text
//!                 ┌───▼────────┐
//!                 │ Dispatcher │  channel → handler
//!                 └───┬────────┘
//!          ┌──────────┴──────────┐
//!      ┌───▼────────┐     ┌──────▼─────┐
//!      │MarketState │     │   Router   │──► waiters
//!      └───┬────────┘     └────────────┘
//!   ┌──────┼─────────┬────────────┐
//! ┌─▼──┐ ┌─▼─────┐ ┌─▼─────┐ ┌────▼───┐
//! │Book│ │Bounded│ │ Keyed │ │Bucketed│
//! └────┘ └───────┘ └───────┘ └────────┘
//! ```

pub mod auth;
pub mod book;
pub mod bucketed;
pub mod checksum;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod keyed;
pub mod metrics;
pub mod router;
pub mod sequence;
pub mod state;
pub mod transport;
pub mod venue;

pub use book::{BookSnapshot, BookUpdate, BookView, PriceLevelBook};
pub use config::StreamConfig;
pub use connection::{Connection, ConnectionHandle};
pub use dispatch::{ChannelExtractor, Dispatcher, HandlerContext};
pub use error::StreamError;
pub use router::{SubscribeRequest, SubscriptionMeta, SubscriptionRouter};
pub use state::{MarketState, SessionState, StreamUpdate};
pub use venue::{PingStyle, VenueProfile};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
