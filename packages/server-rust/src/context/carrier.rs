//! Transport carriers: what a request context can learn from the transport.

use std::net::SocketAddr;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Header carrying the caller's credential. Header names are
/// case-insensitive, so this also matches `accessKey`.
pub const ACCESS_KEY_HEADER: &str = "accesskey";

/// A single HTTP request (possibly batching several operations).
#[derive(Debug, Clone, Default)]
pub struct HttpRequestCarrier {
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    /// Raw request payload, logged onto the request span.
    pub body: Option<Value>,
    /// Cancelled when the underlying connection goes away.
    pub close: Option<CancellationToken>,
}

/// Parameters exchanged when a persistent connection is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionContext {
    pub access_key: Option<String>,
    /// Binary-encoded parent trace context.
    pub trace_context: Option<Bytes>,
}

/// One operation on a persistent connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCarrier {
    pub context: ConnectionContext,
    pub remote_addr: Option<SocketAddr>,
}

/// The transport an operation arrived on.
#[derive(Debug, Clone)]
pub enum TransportCarrier {
    Http(HttpRequestCarrier),
    Connection(ConnectionCarrier),
}

impl TransportCarrier {
    /// Credential presented at the transport level, if any.
    #[must_use]
    pub fn access_key(&self) -> Option<String> {
        let key = match self {
            Self::Http(http) => http
                .headers
                .get(ACCESS_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Self::Connection(conn) => conn.context.access_key.clone(),
        };
        key.filter(|k| !k.is_empty())
    }

    /// Peer address rendered as `ip`, or empty when unknown.
    #[must_use]
    pub fn remote_address(&self) -> String {
        let addr = match self {
            Self::Http(http) => http.remote_addr,
            Self::Connection(conn) => conn.remote_addr,
        };
        addr.map(|a| a.ip().to_string()).unwrap_or_default()
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Http(http) => http.body.as_ref(),
            Self::Connection(_) => None,
        }
    }

    /// Transport-level close signal; persistent connections have none per operation.
    #[must_use]
    pub fn close_signal(&self) -> Option<CancellationToken> {
        match self {
            Self::Http(http) => http.close.clone(),
            Self::Connection(_) => None,
        }
    }
}

impl From<HttpRequestCarrier> for TransportCarrier {
    fn from(carrier: HttpRequestCarrier) -> Self {
        Self::Http(carrier)
    }
}

impl From<ConnectionCarrier> for TransportCarrier {
    fn from(carrier: ConnectionCarrier) -> Self {
        Self::Connection(carrier)
    }
}
