//! Connection supervisor
//!
//! One task per physical connection owns the socket, the router and the
//! session state. Callers talk to it through a [`ConnectionHandle`] and only
//! ever await results; every mutation happens on the task, one command or
//! frame at a time, so handlers never run concurrently.
//!
//! Lifecycle:
//! - idle until the first watch arrives
//! - authenticate (private venues), connect with a deadline, send login
//!   and pending subscribe frames
//! - heartbeat / command / frame loop
//! - on transport loss or missed liveness: reject every subscription with a
//!   retryable error, reset session state, back off, go idle
//!
//! Reconnect is lazy: the next watch after a failure opens the new socket.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::metrics::{MetricsSnapshot, StreamMetrics};
use crate::router::{SubscribeRequest, SubscriptionRouter, Waiter};
use crate::state::SessionState;
use crate::transport::{ConnectRequest, Connector, FrameSink, FrameStream, WireFrame};
use crate::venue::{PingStyle, VenueProfile};

enum Command<V> {
    Watch {
        requests: Vec<SubscribeRequest>,
        waiter: Waiter<V>,
    },
    Unwatch {
        key: String,
        done: oneshot::Sender<bool>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable caller-side handle to a connection task.
///
/// The task shuts down once every handle is dropped.
pub struct ConnectionHandle<V> {
    id: Uuid,
    commands: mpsc::Sender<Command<V>>,
    metrics: Arc<StreamMetrics>,
}

impl<V> Clone for ConnectionHandle<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            commands: self.commands.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

fn closed() -> StreamError {
    StreamError::Cancelled("connection closed".to_string())
}

impl<V: Clone + Send + 'static> ConnectionHandle<V> {
    /// Subscribe to one message key and wait for its next value.
    pub async fn watch(&self, request: SubscribeRequest) -> Result<V, StreamError> {
        self.submit(vec![request]).await
    }

    /// Subscribe to several keys and wait for whichever resolves first.
    pub async fn watch_any(&self, requests: Vec<SubscribeRequest>) -> Result<V, StreamError> {
        if requests.is_empty() {
            return Err(StreamError::Config("watch_any needs at least one key".into()));
        }
        self.submit(requests).await
    }

    async fn submit(&self, requests: Vec<SubscribeRequest>) -> Result<V, StreamError> {
        let (waiter, rx) = Waiter::new();
        self.commands
            .send(Command::Watch { requests, waiter })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    /// Stop watching a key. Returns whether it was subscribed.
    pub async fn unwatch(&self, key: impl Into<String>) -> Result<bool, StreamError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Unwatch {
                key: key.into(),
                done,
            })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Cancel every subscription and close the socket.
    ///
    /// Succeeds if the connection is already gone.
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Entry point for starting connection tasks.
pub struct Connection;

impl Connection {
    /// Validate the config and start the supervisor task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S, V, C>(
        config: StreamConfig,
        venue: VenueProfile<S, V>,
        state: S,
        connector: C,
    ) -> Result<ConnectionHandle<V>, StreamError>
    where
        S: SessionState,
        V: Clone + Send + 'static,
        C: Connector + 'static,
    {
        config.validate()?;
        let id = Uuid::now_v7();
        let metrics = Arc::new(StreamMetrics::new());
        let (tx, rx) = mpsc::channel(config.command_buffer);

        let supervisor = Supervisor {
            id,
            backoff: config.reconnect_backoff_initial,
            config,
            venue,
            state,
            router: SubscriptionRouter::new(Arc::clone(&metrics)),
            connector: Arc::new(connector),
            commands: rx,
            metrics: Arc::clone(&metrics),
            connected_before: false,
        };
        info!(connection_id = %id, venue = %supervisor.venue.name, "Spawning connection");
        tokio::spawn(supervisor.run());

        Ok(ConnectionHandle {
            id,
            commands: tx,
            metrics,
        })
    }
}

/// Effect of a command on the connection.
enum Step {
    Continue,
    Unsubscribe(Value),
    Shutdown(oneshot::Sender<()>),
}

enum SessionEnd {
    Shutdown,
}

struct Supervisor<S, V> {
    id: Uuid,
    config: StreamConfig,
    venue: VenueProfile<S, V>,
    state: S,
    router: SubscriptionRouter<V>,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command<V>>,
    metrics: Arc<StreamMetrics>,
    backoff: Duration,
    connected_before: bool,
}

async fn send_json(sink: &mut FrameSink, frame: &Value) -> Result<(), StreamError> {
    let text = serde_json::to_string(frame)?;
    sink.send(WireFrame::Text(text)).await
}

impl<S, V> Supervisor<S, V>
where
    S: SessionState,
    V: Clone + Send + 'static,
{
    async fn run(mut self) {
        loop {
            // Wait for at least one subscription request.
            while self.router.is_empty() {
                let command = self.commands.recv().await;
                if !self.serve_offline(command) {
                    return;
                }
            }

            match self.session().await {
                Ok(SessionEnd::Shutdown) => return,
                Err(err) => {
                    self.fail(err);
                    warn!(
                        connection_id = %self.id,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Connection lost; backing off"
                    );
                    if !self.back_off().await {
                        return;
                    }
                    self.backoff = (self.backoff * 2).min(self.config.reconnect_backoff_max);
                }
            }
        }
    }

    /// Sleep for the current backoff while still serving commands.
    /// Returns `false` once the supervisor should stop.
    async fn back_off(&mut self) -> bool {
        let delay = sleep(self.backoff);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => {
                    if !self.serve_offline(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// Handle a command while no socket is open. Watches are registered for
    /// the next session and unsubscribe frames have nowhere to go.
    fn serve_offline(&mut self, command: Option<Command<V>>) -> bool {
        let Some(command) = command else {
            info!(connection_id = %self.id, "All handles dropped, connection closed");
            return false;
        };
        match self.apply_command(command) {
            Step::Shutdown(done) => {
                self.cancel_all("connection shut down");
                let _ = done.send(());
                false
            }
            Step::Continue | Step::Unsubscribe(_) => true,
        }
    }

    /// Register or remove subscriptions. Frames go out when connected.
    fn apply_command(&mut self, command: Command<V>) -> Step {
        match command {
            Command::Watch { requests, waiter } => {
                let private = self.venue.is_private();
                if let Some(request) = requests.iter().find(|r| r.meta.private && !private) {
                    waiter.complete(Err(StreamError::Authentication(format!(
                        "{} requires an authenticated connection",
                        request.key
                    ))));
                    return Step::Continue;
                }
                for request in requests {
                    self.router.subscribe(request, waiter.clone());
                }
                Step::Continue
            }
            Command::Unwatch { key, done } => {
                let existed = self.router.contains(&key);
                let frame = self.router.unsubscribe(&key);
                let _ = done.send(existed);
                match frame {
                    Some(frame) => Step::Unsubscribe(frame),
                    None => Step::Continue,
                }
            }
            Command::Shutdown { done } => Step::Shutdown(done),
        }
    }

    fn cancel_all(&mut self, reason: &str) {
        let cancelled = self.router.reject_all(&StreamError::Cancelled(reason.to_string()));
        debug!(connection_id = %self.id, cancelled, reason, "Cancelled subscriptions");
    }

    /// Tear down after a failed session.
    fn fail(&mut self, err: StreamError) {
        // Private watchers see the credential failure; anything else on the
        // connection fails as a retryable transport error.
        let mut rejected = 0;
        if matches!(err, StreamError::Authentication(_)) {
            rejected += self.router.reject_private(&err);
            rejected += self
                .router
                .reject_all(&StreamError::connection(format!("authentication failed: {err}")));
        } else {
            rejected += self.router.reject_all(&err);
        }
        error!(
            connection_id = %self.id,
            error = %err,
            kind = err.kind(),
            rejected,
            "Connection failed"
        );
        self.state.on_reconnect();
    }

    async fn open(&mut self) -> Result<(FrameSink, FrameStream, Option<Value>), StreamError> {
        let mut request = ConnectRequest {
            url: self.config.url.clone(),
            headers: Vec::new(),
        };
        let deadline = self.config.connect_timeout;
        let millis = deadline.as_millis() as u64;

        let mut login = None;
        if let Some(authenticator) = self.venue.authenticator.clone() {
            let credentials = match timeout(deadline, authenticator.authenticate()).await {
                Ok(Ok(credentials)) => credentials,
                Ok(Err(StreamError::Authentication(reason))) => {
                    return Err(StreamError::Authentication(reason))
                }
                Ok(Err(other)) => return Err(StreamError::Authentication(other.to_string())),
                Err(_) => {
                    return Err(StreamError::Timeout {
                        operation: "authenticate".into(),
                        millis,
                    })
                }
            };
            credentials.apply(&mut request);
            login = credentials.login_frame;
            info!(connection_id = %self.id, venue = %self.venue.name, "Authenticated");
        }

        info!(connection_id = %self.id, url = %self.config.url, "Connecting");
        let (sink, stream) = match timeout(deadline, self.connector.connect(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Timeout {
                    operation: "connect".into(),
                    millis,
                })
            }
        };

        self.metrics.record_connect();
        if self.connected_before {
            self.metrics.record_reconnect();
        }
        self.connected_before = true;
        self.backoff = self.config.reconnect_backoff_initial;
        Ok((sink, stream, login))
    }

    /// Send subscribe frames registered since the last flush.
    async fn flush(&mut self, sink: &mut FrameSink) -> Result<(), StreamError> {
        let authenticated = self.venue.is_private();
        for (key, frame) in self.router.take_unsent(authenticated) {
            debug!(connection_id = %self.id, key = %key, "Sending subscribe");
            send_json(sink, &frame).await?;
            self.metrics.record_request_sent();
        }
        Ok(())
    }

    async fn session(&mut self) -> Result<SessionEnd, StreamError> {
        let (mut sink, mut stream, login) = self.open().await?;
        if let Some(login) = login {
            send_json(&mut sink, &login).await?;
        }
        self.flush(&mut sink).await?;

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= self.config.liveness_timeout {
                        self.metrics.record_liveness_failure();
                        warn!(
                            connection_id = %self.id,
                            silent_ms = last_seen.elapsed().as_millis() as u64,
                            "Liveness lost"
                        );
                        return Err(StreamError::connection("liveness timeout"));
                    }
                    if let Some(ping) = self.venue.ping.ping_frame() {
                        sink.send(ping).await?;
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.cancel_all("all handles dropped");
                        let _ = sink.send(WireFrame::Close).await;
                        return Ok(SessionEnd::Shutdown);
                    };
                    match self.apply_command(command) {
                        Step::Continue => self.flush(&mut sink).await?,
                        Step::Unsubscribe(frame) => send_json(&mut sink, &frame).await?,
                        Step::Shutdown(done) => {
                            self.cancel_all("connection shut down");
                            let _ = sink.send(WireFrame::Close).await;
                            let _ = done.send(());
                            info!(connection_id = %self.id, "Connection shut down");
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(frame)) => self.on_frame(frame, &mut sink, &mut last_seen).await?,
                        Some(Err(err)) => return Err(err),
                        None => return Err(StreamError::connection("stream ended")),
                    }
                }
            }
        }
    }

    async fn on_frame(
        &mut self,
        frame: WireFrame,
        sink: &mut FrameSink,
        last_seen: &mut Instant,
    ) -> Result<(), StreamError> {
        self.metrics.record_frame_received();
        if self.venue.ping == PingStyle::Passive {
            *last_seen = Instant::now();
        }

        match frame {
            WireFrame::Text(text) => self.on_text(&text, sink, last_seen).await,
            WireFrame::Binary(data) => match String::from_utf8(data) {
                Ok(text) => self.on_text(&text, sink, last_seen).await,
                Err(_) => {
                    self.metrics.record_frame_dropped();
                    warn!(connection_id = %self.id, "Dropping non-UTF-8 binary frame");
                    Ok(())
                }
            },
            WireFrame::Ping(payload) => sink.send(WireFrame::Pong(payload)).await,
            WireFrame::Pong(_) => {
                if self.venue.ping == PingStyle::Protocol {
                    *last_seen = Instant::now();
                }
                Ok(())
            }
            WireFrame::Close => Err(StreamError::connection("closed by peer")),
        }
    }

    async fn on_text(
        &mut self,
        text: &str,
        sink: &mut FrameSink,
        last_seen: &mut Instant,
    ) -> Result<(), StreamError> {
        if self.venue.ping.is_pong_text(text) {
            *last_seen = Instant::now();
            return Ok(());
        }

        let mut outbound = Vec::new();
        match self
            .venue
            .dispatcher
            .dispatch(text, &mut self.state, &mut self.router, &mut outbound)
        {
            Ok(outcome) => {
                if self.venue.ping.is_pong_channel(outcome.channel.as_deref()) {
                    *last_seen = Instant::now();
                }
                if outcome.handled {
                    self.metrics.record_frame_dispatched();
                } else {
                    self.metrics.record_frame_ignored();
                }
            }
            Err(err) => {
                self.metrics.record_frame_dropped();
                warn!(connection_id = %self.id, error = %err, "Dropping frame");
            }
        }

        for frame in outbound {
            send_json(sink, &frame).await?;
        }
        Ok(())
    }
}
