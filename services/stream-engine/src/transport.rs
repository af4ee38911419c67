//! Transport seam between the supervisor and a socket
//!
//! The supervisor only sees a sink and a stream of [`WireFrame`]s. The
//! production connector wraps tokio-tungstenite; tests plug in channels.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::error::StreamError;

/// A transport-neutral websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = StreamError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, StreamError>> + Send>>;

/// Where to connect and what to attach to the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Opens one physical connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), StreamError>;
}

/// tokio-tungstenite connector (TLS via rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

fn fatal(reason: String) -> StreamError {
    StreamError::Connection {
        reason,
        retryable: false,
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data),
        WireFrame::Ping(data) => Message::Ping(data),
        WireFrame::Pong(data) => Message::Pong(data),
        WireFrame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<WireFrame> {
    match message {
        Message::Text(text) => Some(WireFrame::Text(text)),
        Message::Binary(data) => Some(WireFrame::Binary(data)),
        Message::Ping(data) => Some(WireFrame::Ping(data)),
        Message::Pong(data) => Some(WireFrame::Pong(data)),
        Message::Close(frame) => {
            debug!(?frame, "Websocket close frame");
            Some(WireFrame::Close)
        }
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), StreamError> {
        let mut client_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| fatal(format!("invalid url {}: {e}", request.url)))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| fatal(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| fatal(format!("invalid header value for {name}: {e}")))?;
            client_request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) = connect_async(client_request)
            .await
            .map_err(|e| StreamError::connection(format!("connect {}: {e}", request.url)))?;
        info!(url = %request.url, status = %response.status(), "Websocket connected");

        let (write, read) = ws_stream.split();
        let sink = write
            .sink_map_err(|e| StreamError::connection(format!("send: {e}")))
            .with(|frame: WireFrame| future::ready(Ok::<_, StreamError>(to_message(frame))));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(StreamError::connection(format!("receive: {e}")))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
