//! Inbound frame routing
//!
//! Each venue adapter supplies a table of channel name → handler and the
//! rules for finding the channel name in a decoded frame. Dispatch decodes
//! the frame once, finds its channel, and runs exactly one handler to
//! completion. Frames whose channel has no handler are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::StreamError;
use crate::router::SubscriptionRouter;

/// What a handler may touch while processing one frame.
pub struct HandlerContext<'a, S, V> {
    pub state: &'a mut S,
    pub router: &'a mut SubscriptionRouter<V>,
    outbound: &'a mut Vec<Value>,
}

impl<'a, S, V: Clone> HandlerContext<'a, S, V> {
    pub fn new(
        state: &'a mut S,
        router: &'a mut SubscriptionRouter<V>,
        outbound: &'a mut Vec<Value>,
    ) -> Self {
        Self {
            state,
            router,
            outbound,
        }
    }

    /// Queue a frame to send once the handler returns.
    pub fn send(&mut self, frame: Value) {
        self.outbound.push(frame);
    }

    pub fn resolve(&mut self, key: &str, value: V) -> usize {
        self.router.resolve(key, value)
    }

    pub fn reject(&mut self, key: &str, error: StreamError) -> usize {
        self.router.reject(key, error)
    }
}

/// Processes frames for one channel.
pub trait Handler<S, V>: Send + Sync {
    fn handle(&self, ctx: &mut HandlerContext<'_, S, V>, frame: &Value) -> Result<(), StreamError>;
}

impl<S, V, F> Handler<S, V> for F
where
    F: Fn(&mut HandlerContext<'_, S, V>, &Value) -> Result<(), StreamError> + Send + Sync,
{
    fn handle(&self, ctx: &mut HandlerContext<'_, S, V>, frame: &Value) -> Result<(), StreamError> {
        self(ctx, frame)
    }
}

/// How to find the logical channel of a decoded frame.
#[derive(Clone)]
pub enum ChannelExtractor {
    /// Top-level string field, e.g. `"channel"`, `"type"` or `"event"`.
    Field(String),
    /// JSON pointer to a string, e.g. `"/arg/channel"`.
    Pointer(String),
    /// Adapter-specific rule for composite or positional frames.
    Custom(Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>),
}

impl ChannelExtractor {
    pub fn field(name: impl Into<String>) -> Self {
        ChannelExtractor::Field(name.into())
    }

    pub fn pointer(path: impl Into<String>) -> Self {
        ChannelExtractor::Pointer(path.into())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        ChannelExtractor::Custom(Arc::new(f))
    }

    pub fn extract(&self, frame: &Value) -> Option<String> {
        match self {
            ChannelExtractor::Field(name) => frame.get(name)?.as_str().map(str::to_string),
            ChannelExtractor::Pointer(path) => frame.pointer(path)?.as_str().map(str::to_string),
            ChannelExtractor::Custom(f) => f(frame),
        }
    }
}

impl fmt::Debug for ChannelExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelExtractor::Field(name) => f.debug_tuple("Field").field(name).finish(),
            ChannelExtractor::Pointer(path) => f.debug_tuple("Pointer").field(path).finish(),
            ChannelExtractor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub channel: Option<String>,
    /// A registered handler ran.
    pub handled: bool,
}

/// Channel table for one venue.
pub struct Dispatcher<S, V> {
    extractors: Vec<ChannelExtractor>,
    handlers: HashMap<String, Box<dyn Handler<S, V>>>,
}

impl<S, V: Clone> Dispatcher<S, V> {
    /// Extractors are tried in order; the first that yields a name wins.
    pub fn new(extractors: Vec<ChannelExtractor>) -> Self {
        Self {
            extractors,
            handlers: HashMap::new(),
        }
    }

    /// Register a closure or function for a channel.
    pub fn on<F>(mut self, channel: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_, S, V>, &Value) -> Result<(), StreamError> + Send + Sync + 'static,
        S: 'static,
        V: 'static,
    {
        self.handlers.insert(channel.into(), Box::new(handler));
        self
    }

    /// Register a handler object for a channel, replacing any previous one.
    pub fn register(&mut self, channel: impl Into<String>, handler: Box<dyn Handler<S, V>>) {
        self.handlers.insert(channel.into(), handler);
    }

    pub fn channel_of(&self, frame: &Value) -> Option<String> {
        self.extractors.iter().find_map(|e| e.extract(frame))
    }

    pub fn has_handler(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Decode and route one text frame.
    ///
    /// Handler errors are returned after the handler finished; the handler
    /// has already applied whatever it could.
    pub fn dispatch(
        &self,
        text: &str,
        state: &mut S,
        router: &mut SubscriptionRouter<V>,
        outbound: &mut Vec<Value>,
    ) -> Result<DispatchOutcome, StreamError> {
        let frame: Value = serde_json::from_str(text)?;
        let channel = self.channel_of(&frame);

        let handler = match channel.as_deref().and_then(|c| self.handlers.get(c)) {
            Some(handler) => handler,
            None => {
                debug!(channel = ?channel, "No handler for frame, ignoring");
                return Ok(DispatchOutcome {
                    channel,
                    handled: false,
                });
            }
        };

        let mut ctx = HandlerContext::new(state, router, outbound);
        handler.handle(&mut ctx, &frame)?;
        Ok(DispatchOutcome {
            channel,
            handled: true,
        })
    }
}

impl<S, V> fmt::Debug for Dispatcher<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut channels: Vec<&String> = self.handlers.keys().collect();
        channels.sort();
        f.debug_struct("Dispatcher")
            .field("extractors", &self.extractors)
            .field("channels", &channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StreamMetrics;
    use crate::router::{SubscribeRequest, Waiter};
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        trades: usize,
    }

    fn handle_trades(ctx: &mut HandlerContext<'_, Counter, usize>, frame: &Value) -> Result<(), StreamError> {
        let data = frame
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| StreamError::Decode("missing data".into()))?;
        ctx.state.trades += data.len();
        let total = ctx.state.trades;
        ctx.resolve("trades:ETH/USD", total);
        Ok(())
    }

    fn make_dispatcher() -> Dispatcher<Counter, usize> {
        Dispatcher::new(vec![
            ChannelExtractor::field("event"),
            ChannelExtractor::pointer("/arg/channel"),
        ])
        .on("trades", handle_trades)
        .on("ping", |ctx: &mut HandlerContext<'_, Counter, usize>, _frame: &Value| {
            ctx.send(json!({ "event": "pong" }));
            Ok(())
        })
    }

    fn make_router() -> SubscriptionRouter<usize> {
        SubscriptionRouter::new(Arc::new(StreamMetrics::new()))
    }

    #[test]
    fn test_dispatch_routes_by_pointer() {
        let dispatcher = make_dispatcher();
        let mut state = Counter::default();
        let mut router = make_router();
        let mut outbound = Vec::new();
        let (w, mut rx) = Waiter::new();
        router.subscribe(SubscribeRequest::new("trades:ETH/USD", json!({})), w);

        let frame = r#"{"arg":{"channel":"trades","instId":"ETH-USD"},"data":[{},{}]}"#;
        let outcome = dispatcher
            .dispatch(frame, &mut state, &mut router, &mut outbound)
            .unwrap();

        assert!(outcome.handled);
        assert_eq!(outcome.channel.as_deref(), Some("trades"));
        assert_eq!(state.trades, 2);
        assert_eq!(rx.try_recv().unwrap(), Ok(2));
    }

    #[test]
    fn test_unknown_channel_ignored() {
        let dispatcher = make_dispatcher();
        let mut state = Counter::default();
        let mut router = make_router();
        let mut outbound = Vec::new();

        let outcome = dispatcher
            .dispatch(r#"{"arg":{"channel":"funding-rate"}}"#, &mut state, &mut router, &mut outbound)
            .unwrap();
        assert!(!outcome.handled);
        assert_eq!(outcome.channel.as_deref(), Some("funding-rate"));

        let outcome = dispatcher
            .dispatch(r#"[1, 2, 3]"#, &mut state, &mut router, &mut outbound)
            .unwrap();
        assert_eq!(outcome.channel, None);
    }

    #[test]
    fn test_malformed_frame_is_decode_error() {
        let dispatcher = make_dispatcher();
        let mut state = Counter::default();
        let mut router = make_router();
        let mut outbound = Vec::new();

        let err = dispatcher
            .dispatch("{not json", &mut state, &mut router, &mut outbound)
            .unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
    }

    #[test]
    fn test_handler_error_propagates() {
        let dispatcher = make_dispatcher();
        let mut state = Counter::default();
        let mut router = make_router();
        let mut outbound = Vec::new();

        let err = dispatcher
            .dispatch(r#"{"arg":{"channel":"trades"}}"#, &mut state, &mut router, &mut outbound)
            .unwrap_err();
        assert_eq!(err, StreamError::Decode("missing data".into()));
    }

    #[test]
    fn test_handler_outbound_frames() {
        let dispatcher = make_dispatcher();
        let mut state = Counter::default();
        let mut router = make_router();
        let mut outbound = Vec::new();

        dispatcher
            .dispatch(r#"{"event":"ping"}"#, &mut state, &mut router, &mut outbound)
            .unwrap();
        assert_eq!(outbound, vec![json!({ "event": "pong" })]);
    }

    #[test]
    fn test_custom_extractor() {
        // Positional frames: [channel_id, payload, channel_name, pair]
        let extractor = ChannelExtractor::custom(|frame| {
            frame.as_array()?.get(2)?.as_str().map(str::to_string)
        });
        let frame = json!([340, {"a": []}, "book-10", "XBT/USD"]);
        assert_eq!(extractor.extract(&frame).as_deref(), Some("book-10"));
        assert_eq!(extractor.extract(&json!({"event": "heartbeat"})), None);
    }

    #[test]
    fn test_first_matching_extractor_wins() {
        let dispatcher = make_dispatcher();
        let frame = json!({ "event": "subscribe", "arg": { "channel": "trades" } });
        assert_eq!(dispatcher.channel_of(&frame).as_deref(), Some("subscribe"));
        assert!(dispatcher.has_handler("trades"));
        assert!(!dispatcher.has_handler("subscribe"));
    }
}
