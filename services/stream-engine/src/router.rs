//! Subscription registry for one connection
//!
//! Maps each message key to at most one [`PendingSubscription`]. Callers
//! attach [`Waiter`]s to a key; the subscribe frame for a key goes out once,
//! no matter how many callers watch it. Handlers complete waiters through
//! `resolve` / `reject`.
//!
//! A resolved subscription stays registered (the venue keeps streaming) and
//! the next watcher simply waits for the next update. A rejected one is
//! removed so the next watch sends a fresh subscribe.
//!
//! Uses BTreeMap so teardown visits keys in a stable order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use types::ids::Symbol;

use crate::error::StreamError;
use crate::metrics::StreamMetrics;

/// Outcome delivered to a watcher.
pub type WatchResult<V> = Result<V, StreamError>;

/// One caller's completion slot.
///
/// Cloning shares the slot, which is how a single multi-key watch is
/// attached to several keys: whichever key completes first wins and later
/// completions are no-ops.
pub struct Waiter<V> {
    slot: Arc<Mutex<Option<oneshot::Sender<WatchResult<V>>>>>,
}

impl<V> Clone for Waiter<V> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<V> std::fmt::Debug for Waiter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<V> Waiter<V> {
    /// Create a waiter and the receiver its caller awaits.
    pub fn new() -> (Self, oneshot::Receiver<WatchResult<V>>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (waiter, rx)
    }

    /// Deliver a result. Returns whether a live caller received it.
    pub fn complete(&self, result: WatchResult<V>) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Already completed, or the caller stopped waiting.
    pub fn is_closed(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.as_ref().map_or(true, |tx| tx.is_closed()),
            Err(_) => true,
        }
    }
}

/// Per-subscription metadata supplied by the adapter at subscribe time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMeta {
    pub symbol: Option<Symbol>,
    /// Requires an authenticated connection.
    pub private: bool,
    /// Verify book checksums on this stream.
    pub checksum: bool,
    /// Set by handlers once the initial snapshot has been applied.
    pub snapshot_received: bool,
    /// Requested depth or record limit, if any.
    pub limit: Option<usize>,
}

/// Everything needed to start watching one message key.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub key: String,
    /// Frame sent when the key is not yet subscribed.
    pub request: Value,
    /// Frame sent on unwatch, if the venue supports unsubscribing.
    pub unsubscribe: Option<Value>,
    pub meta: SubscriptionMeta,
}

impl SubscribeRequest {
    pub fn new(key: impl Into<String>, request: Value) -> Self {
        Self {
            key: key.into(),
            request,
            unsubscribe: None,
            meta: SubscriptionMeta::default(),
        }
    }

    pub fn with_unsubscribe(mut self, frame: Value) -> Self {
        self.unsubscribe = Some(frame);
        self
    }

    pub fn with_meta(mut self, meta: SubscriptionMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// One outstanding or fulfilled watch.
#[derive(Debug)]
pub struct PendingSubscription<V> {
    pub meta: SubscriptionMeta,
    request: Value,
    unsubscribe: Option<Value>,
    /// Whether the subscribe frame has gone out on the current connection.
    sent: bool,
    waiters: Vec<Waiter<V>>,
}

impl<V> PendingSubscription<V> {
    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

/// Registry of subscriptions on one connection.
#[derive(Debug)]
pub struct SubscriptionRouter<V> {
    pending: BTreeMap<String, PendingSubscription<V>>,
    metrics: Arc<StreamMetrics>,
}

impl<V: Clone> SubscriptionRouter<V> {
    pub fn new(metrics: Arc<StreamMetrics>) -> Self {
        Self {
            pending: BTreeMap::new(),
            metrics,
        }
    }

    /// Attach a waiter to `request.key`, registering the key if new.
    ///
    /// Returns true when the key was newly registered and its subscribe
    /// frame is queued for [`take_unsent`](Self::take_unsent).
    pub fn subscribe(&mut self, request: SubscribeRequest, waiter: Waiter<V>) -> bool {
        if let Some(existing) = self.pending.get_mut(&request.key) {
            existing.waiters.retain(|w| !w.is_closed());
            existing.waiters.push(waiter);
            debug!(key = %request.key, waiters = existing.waiters.len(), "Joined existing subscription");
            return false;
        }

        debug!(key = %request.key, "Registering subscription");
        self.pending.insert(
            request.key,
            PendingSubscription {
                meta: request.meta,
                request: request.request,
                unsubscribe: request.unsubscribe,
                sent: false,
                waiters: vec![waiter],
            },
        );
        true
    }

    /// Subscribe frames not yet sent on the current connection, in key
    /// order. Marks them sent.
    ///
    /// Private subscriptions are held back unless `authenticated`.
    pub fn take_unsent(&mut self, authenticated: bool) -> Vec<(String, Value)> {
        self.pending
            .iter_mut()
            .filter(|(_, sub)| !sub.sent && (authenticated || !sub.meta.private))
            .map(|(key, sub)| {
                sub.sent = true;
                (key.clone(), sub.request.clone())
            })
            .collect()
    }

    /// Remove a subscription and cancel its waiters. Idempotent.
    ///
    /// Returns the unsubscribe frame when the subscribe had gone out and
    /// the venue supports unsubscribing.
    pub fn unsubscribe(&mut self, key: &str) -> Option<Value> {
        let sub = self.pending.remove(key)?;
        let cancelled = Self::complete_all(&sub.waiters, || {
            Err(StreamError::Cancelled(key.to_string()))
        });
        self.metrics.record_rejections(cancelled);
        debug!(key, cancelled, "Unsubscribed");
        if sub.sent {
            sub.unsubscribe
        } else {
            None
        }
    }

    /// Complete every waiter on `key` with `value`. The subscription stays
    /// registered. Returns how many callers received it; unknown keys are a
    /// no-op.
    pub fn resolve(&mut self, key: &str, value: V) -> usize {
        let Some(sub) = self.pending.get_mut(key) else {
            return 0;
        };
        let waiters = std::mem::take(&mut sub.waiters);
        let delivered = Self::complete_all(&waiters, || Ok(value.clone()));
        self.metrics.record_resolutions(delivered);
        delivered
    }

    /// Complete every waiter on `key` with `error` and remove the
    /// subscription.
    pub fn reject(&mut self, key: &str, error: StreamError) -> usize {
        let Some(sub) = self.pending.remove(key) else {
            return 0;
        };
        let delivered = Self::complete_all(&sub.waiters, || Err(error.clone()));
        self.metrics.record_rejections(delivered);
        debug!(key, error = %error, delivered, "Subscription rejected");
        delivered
    }

    /// Reject and remove every subscription.
    pub fn reject_all(&mut self, error: &StreamError) -> usize {
        let keys: Vec<String> = self.pending.keys().cloned().collect();
        keys.iter().map(|key| self.reject(key, error.clone())).sum()
    }

    /// Reject and remove every private subscription.
    pub fn reject_private(&mut self, error: &StreamError) -> usize {
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, sub)| sub.meta.private)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().map(|key| self.reject(key, error.clone())).sum()
    }

    fn complete_all<F>(waiters: &[Waiter<V>], mut result: F) -> usize
    where
        F: FnMut() -> WatchResult<V>,
    {
        waiters
            .iter()
            .filter(|waiter| waiter.complete(result()))
            .count()
    }

    pub fn meta(&self, key: &str) -> Option<&SubscriptionMeta> {
        self.pending.get(key).map(|sub| &sub.meta)
    }

    pub fn meta_mut(&mut self, key: &str) -> Option<&mut SubscriptionMeta> {
        self.pending.get_mut(key).map(|sub| &mut sub.meta)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Whether anyone is currently awaiting `key`.
    pub fn has_waiters(&self, key: &str) -> bool {
        self.pending
            .get(key)
            .is_some_and(|sub| sub.live_waiters() > 0)
    }

    /// Whether any registered subscription requires authentication.
    pub fn has_private(&self) -> bool {
        self.pending.values().any(|sub| sub.meta.private)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_router() -> SubscriptionRouter<u32> {
        SubscriptionRouter::new(Arc::new(StreamMetrics::new()))
    }

    fn request(key: &str) -> SubscribeRequest {
        SubscribeRequest::new(key, json!({ "op": "subscribe", "key": key }))
            .with_unsubscribe(json!({ "op": "unsubscribe", "key": key }))
    }

    #[test]
    fn test_single_request_per_key() {
        let mut router = make_router();
        let (w1, mut rx1) = Waiter::new();
        let (w2, mut rx2) = Waiter::new();

        assert!(router.subscribe(request("trades:ETH/USD"), w1));
        assert!(!router.subscribe(request("trades:ETH/USD"), w2));

        let unsent = router.take_unsent(false);
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].0, "trades:ETH/USD");
        assert!(router.take_unsent(false).is_empty());

        assert_eq!(router.resolve("trades:ETH/USD", 7), 2);
        assert_eq!(rx1.try_recv().unwrap(), Ok(7));
        assert_eq!(rx2.try_recv().unwrap(), Ok(7));
        assert_eq!(router.metrics().snapshot().resolutions, 2);
    }

    #[test]
    fn test_resolve_keeps_subscription() {
        let mut router = make_router();
        let (w1, _rx1) = Waiter::new();
        router.subscribe(request("book:BTC/USD"), w1);
        router.take_unsent(false);
        router.resolve("book:BTC/USD", 1);

        assert!(router.contains("book:BTC/USD"));
        assert!(!router.has_waiters("book:BTC/USD"));

        // Next watcher waits for the next update without a new request
        let (w2, mut rx2) = Waiter::new();
        assert!(!router.subscribe(request("book:BTC/USD"), w2));
        assert!(router.take_unsent(false).is_empty());
        router.resolve("book:BTC/USD", 2);
        assert_eq!(rx2.try_recv().unwrap(), Ok(2));
    }

    #[test]
    fn test_resolve_unknown_key_is_noop() {
        let mut router = make_router();
        assert_eq!(router.resolve("nothing", 1), 0);
        assert_eq!(router.reject("nothing", StreamError::connection("x")), 0);
    }

    #[test]
    fn test_reject_removes_subscription() {
        let mut router = make_router();
        let (w, mut rx) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w);
        router.take_unsent(false);

        let err = StreamError::Protocol {
            key: "trades:BTC/USD".into(),
            message: "invalid symbol".into(),
        };
        assert_eq!(router.reject("trades:BTC/USD", err.clone()), 1);
        assert_eq!(rx.try_recv().unwrap(), Err(err));
        assert!(!router.contains("trades:BTC/USD"));

        // Re-subscribing sends a fresh request
        let (w, _rx) = Waiter::new();
        assert!(router.subscribe(request("trades:BTC/USD"), w));
        assert_eq!(router.take_unsent(false).len(), 1);
    }

    #[test]
    fn test_unsubscribe_cancels_and_is_idempotent() {
        let mut router = make_router();
        let (w, mut rx) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w);
        router.take_unsent(false);

        let frame = router.unsubscribe("trades:BTC/USD");
        assert_eq!(frame, Some(json!({ "op": "unsubscribe", "key": "trades:BTC/USD" })));
        assert!(matches!(rx.try_recv().unwrap(), Err(StreamError::Cancelled(_))));
        assert_eq!(router.unsubscribe("trades:BTC/USD"), None);
    }

    #[test]
    fn test_unsubscribe_before_send_has_no_frame() {
        let mut router = make_router();
        let (w, _rx) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w);
        assert_eq!(router.unsubscribe("trades:BTC/USD"), None);
        assert!(router.take_unsent(false).is_empty());
    }

    #[test]
    fn test_shared_waiter_completes_once() {
        let mut router = make_router();
        let (w, mut rx) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w.clone());
        router.subscribe(request("trades:ETH/USD"), w);

        assert_eq!(router.resolve("trades:ETH/USD", 2), 1);
        assert_eq!(router.resolve("trades:BTC/USD", 1), 0);
        assert_eq!(rx.try_recv().unwrap(), Ok(2));
    }

    #[test]
    fn test_dropped_caller_pruned() {
        let mut router = make_router();
        let (w1, rx1) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w1);
        drop(rx1);
        assert!(!router.has_waiters("trades:BTC/USD"));

        let (w2, _rx2) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w2);
        assert_eq!(router.resolve("trades:BTC/USD", 3), 1);
    }

    #[test]
    fn test_private_held_until_authenticated() {
        let mut router = make_router();
        let private = SubscriptionMeta {
            private: true,
            ..SubscriptionMeta::default()
        };
        let (w1, _rx1) = Waiter::new();
        let (w2, mut rx2) = Waiter::new();
        router.subscribe(request("trades:BTC/USD"), w1);
        router.subscribe(request("orders").with_meta(private), w2);
        assert!(router.has_private());

        let public_only: Vec<_> = router.take_unsent(false).into_iter().map(|(k, _)| k).collect();
        assert_eq!(public_only, vec!["trades:BTC/USD"]);

        let err = StreamError::Authentication("bad signature".into());
        assert_eq!(router.reject_private(&err), 1);
        assert_eq!(rx2.try_recv().unwrap(), Err(err));
        assert!(router.contains("trades:BTC/USD"));
    }

    #[test]
    fn test_reject_all() {
        let mut router = make_router();
        let mut receivers = Vec::new();
        for key in ["a", "b", "c"] {
            let (w, rx) = Waiter::new();
            router.subscribe(request(key), w);
            receivers.push(rx);
        }

        let err = StreamError::connection("liveness timeout");
        assert_eq!(router.reject_all(&err), 3);
        assert!(router.is_empty());
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Err(err.clone()));
        }
    }
}
