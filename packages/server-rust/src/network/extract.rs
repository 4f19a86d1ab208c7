//! Axum extractor building a transport carrier from an HTTP request.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use http::request::Parts;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::context::carrier::{HttpRequestCarrier, TransportCarrier};

/// Headers, peer address and close signal of the current HTTP request.
///
/// The close signal fires when this extractor is dropped: at the end of the
/// handler, or earlier when the client disconnects and the handler future
/// is cancelled. Keep it alive for as long as the request is served.
pub struct HttpCarrier {
    carrier: HttpRequestCarrier,
    _close_on_drop: DropGuard,
}

impl std::fmt::Debug for HttpCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCarrier")
            .field("carrier", &self.carrier)
            .finish_non_exhaustive()
    }
}

impl HttpCarrier {
    /// Attaches the decoded request payload.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.carrier.body = Some(body);
        self
    }

    /// The carrier handed to [`RequestContext::new`](crate::context::RequestContext::new).
    #[must_use]
    pub fn transport(&self) -> TransportCarrier {
        TransportCarrier::Http(self.carrier.clone())
    }
}

impl<S> FromRequestParts<S> for HttpCarrier
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let close = CancellationToken::new();
        Ok(Self {
            carrier: HttpRequestCarrier {
                headers: parts.headers.clone(),
                remote_addr,
                body: None,
                close: Some(close.clone()),
            },
            _close_on_drop: close.drop_guard(),
        })
    }
}
