//! Shared harness: an in-memory venue and a small adapter on top of it.
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use stream_engine::book::{BookDelta, BookSide, BookSnapshot, BookUpdate, PriceLevel};
use stream_engine::dispatch::{ChannelExtractor, Dispatcher, HandlerContext};
use stream_engine::error::StreamError;
use stream_engine::router::{SubscribeRequest, SubscriptionMeta};
use stream_engine::state::{MarketState, StreamUpdate};
use stream_engine::transport::{ConnectRequest, Connector, FrameSink, FrameStream, WireFrame};
use stream_engine::venue::VenueProfile;
use tokio::sync::mpsc;
use types::ids::Symbol;
use types::numeric::decimal_from_json;
use types::order::Side;
use types::trade::Trade;

pub const SYMBOL: &str = "BTC/USD";

/// Route engine logs to the test writer.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// The venue side of one accepted connection.
pub struct Peer {
    /// Frames the engine sent.
    pub outbound: fmpsc::UnboundedReceiver<WireFrame>,
    /// Frames the venue pushes to the engine.
    pub inbound: fmpsc::UnboundedSender<Result<WireFrame, StreamError>>,
}

impl Peer {
    /// Next text frame from the engine, skipping control frames.
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.outbound.next().await {
                Some(WireFrame::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(_) => continue,
                None => panic!("engine closed the connection"),
            }
        }
    }

    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.outbound.next().await
    }

    /// Whether nothing has been sent since the last read.
    pub fn is_quiet(&mut self) -> bool {
        matches!(self.outbound.try_next(), Err(_))
    }

    pub async fn push(&mut self, frame: Value) {
        self.inbound.send(Ok(WireFrame::Text(frame.to_string()))).await.unwrap();
    }

    pub async fn push_frame(&mut self, frame: WireFrame) {
        self.inbound.send(Ok(frame)).await.unwrap();
    }
}

/// Connector that hands each new connection to the test as a [`Peer`].
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<Peer>,
    pub requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        (connector, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), StreamError> {
        self.requests.lock().unwrap().push(request.clone());
        let (engine_tx, venue_rx) = fmpsc::unbounded();
        let (venue_tx, engine_rx) = fmpsc::unbounded();
        self.peers
            .send(Peer {
                outbound: venue_rx,
                inbound: venue_tx,
            })
            .map_err(|_| StreamError::connection("test harness gone"))?;

        let sink = engine_tx.sink_map_err(|e| StreamError::connection(e.to_string()));
        Ok((Box::pin(sink), Box::pin(engine_rx)))
    }
}

fn levels(frame: &Value, side: &str) -> Result<Vec<(Decimal, Decimal)>, StreamError> {
    let Some(rows) = frame.get(side).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let price = row.get(0).and_then(decimal_from_json);
            let size = row.get(1).and_then(decimal_from_json);
            match (price, size) {
                (Some(price), Some(size)) => Ok((price, size)),
                _ => Err(StreamError::Decode(format!("bad level {row}"))),
            }
        })
        .collect()
}

fn on_book(ctx: &mut HandlerContext<'_, MarketState, StreamUpdate>, frame: &Value) -> Result<(), StreamError> {
    let symbol = Symbol::new(frame["symbol"].as_str().unwrap_or(SYMBOL));
    let key = format!("book:{symbol}");
    let checksum = frame.get("checksum").and_then(Value::as_i64);
    let nonce = frame.get("seq").and_then(Value::as_u64);
    let bids = levels(frame, "bids")?;
    let asks = levels(frame, "asks")?;

    if frame["type"] == "snapshot" {
        let snapshot = BookSnapshot {
            bids: bids.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            asks: asks.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            nonce,
            timestamp: None,
        };
        ctx.state.apply_book_snapshot(ctx.router, &key, &symbol, snapshot, checksum);
    } else {
        let deltas = bids
            .into_iter()
            .map(|(price, size)| BookDelta { side: BookSide::Bids, price, size })
            .chain(
                asks.into_iter()
                    .map(|(price, size)| BookDelta { side: BookSide::Asks, price, size }),
            )
            .collect();
        let update = BookUpdate {
            deltas,
            nonce,
            prev_nonce: frame.get("prev").and_then(Value::as_u64),
            timestamp: None,
        };
        ctx.state.apply_book_update(ctx.router, &key, &symbol, update, checksum);
    }
    Ok(())
}

fn on_trade(ctx: &mut HandlerContext<'_, MarketState, StreamUpdate>, frame: &Value) -> Result<(), StreamError> {
    let symbol = Symbol::new(frame["symbol"].as_str().unwrap_or(SYMBOL));
    let key = format!("trade:{symbol}");
    let trades = frame["data"]
        .as_array()
        .map(|rows| rows.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|row| {
            Ok(Trade {
                id: row["id"].as_str().map(str::to_string),
                order_id: None,
                symbol: symbol.clone(),
                side: row["side"].as_str().and_then(|s| Side::from_str(s).ok()),
                price: decimal_from_json(&row["price"])
                    .ok_or_else(|| StreamError::Decode("trade price".into()))?,
                amount: decimal_from_json(&row["amount"])
                    .ok_or_else(|| StreamError::Decode("trade amount".into()))?,
                timestamp: row["ts"].as_i64().unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, StreamError>>()?;
    ctx.state.push_trades(ctx.router, &key, &symbol, trades);
    Ok(())
}

fn on_error(ctx: &mut HandlerContext<'_, MarketState, StreamUpdate>, frame: &Value) -> Result<(), StreamError> {
    let key = frame["key"].as_str().unwrap_or_default().to_string();
    let message = frame["message"].as_str().unwrap_or("rejected").to_string();
    ctx.reject(&key, StreamError::Protocol { key: key.clone(), message });
    Ok(())
}

/// A toy venue: `{"channel": "...", ...}` frames, protocol pings.
pub fn venue() -> VenueProfile<MarketState, StreamUpdate> {
    let dispatcher = Dispatcher::new(vec![ChannelExtractor::field("channel")])
        .on("book", on_book)
        .on("trade", on_trade)
        .on("error", on_error)
        .on("heartbeat", |_: &mut HandlerContext<'_, MarketState, StreamUpdate>, _: &Value| Ok(()));
    VenueProfile::new("memory", dispatcher)
}

pub fn trade_request() -> SubscribeRequest {
    SubscribeRequest::new(
        format!("trade:{SYMBOL}"),
        json!({ "op": "subscribe", "channel": "trade", "symbol": SYMBOL }),
    )
    .with_unsubscribe(json!({ "op": "unsubscribe", "channel": "trade", "symbol": SYMBOL }))
}

pub fn book_request() -> SubscribeRequest {
    let meta = SubscriptionMeta {
        symbol: Some(Symbol::new(SYMBOL)),
        checksum: true,
        ..SubscriptionMeta::default()
    };
    SubscribeRequest::new(
        format!("book:{SYMBOL}"),
        json!({ "op": "subscribe", "channel": "book", "symbol": SYMBOL }),
    )
    .with_meta(meta)
}

pub fn trade_frame(id: &str, price: &str) -> Value {
    json!({
        "channel": "trade",
        "symbol": SYMBOL,
        "data": [{ "id": id, "side": "buy", "price": price, "amount": "0.5", "ts": 1_708_123_456_000_i64 }],
    })
}
