//! Connection authentication seam
//!
//! Venues authenticate a private connection in one of three ways: signed
//! handshake headers, a signed token in the URL query, or a login frame sent
//! right after connecting. An [`Authenticator`] produces whichever of those
//! its venue needs; signing itself lives with the adapter.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StreamError;
use crate::transport::ConnectRequest;

/// Material that authenticates one physical connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub headers: Vec<(String, String)>,
    /// Appended to the URL (`?` or `&` added as needed).
    pub query: Option<String>,
    /// Sent before any subscribe frame.
    pub login_frame: Option<Value>,
}

impl Credentials {
    /// Apply headers and query to a connect request.
    pub fn apply(&self, request: &mut ConnectRequest) {
        request.headers.extend(self.headers.iter().cloned());
        if let Some(query) = &self.query {
            let separator = if request.url.contains('?') { '&' } else { '?' };
            request.url.push(separator);
            request.url.push_str(query);
        }
    }
}

/// Signs a fresh nonce for each connection.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// A failure is reported as `StreamError::Authentication`.
    async fn authenticate(&self) -> Result<Credentials, StreamError>;
}
