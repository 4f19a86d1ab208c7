//! Persistent-connection handshake parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;

use qserver_core::AccessArgs;

use crate::context::carrier::ConnectionContext;

/// Builds the connection context from the parameters a client sends when it
/// opens a persistent connection.
///
/// The credential is read from `accessKey`, falling back to `accesskey`. An
/// optional `traceContext` string carries the base64 of a binary span
/// context; anything that does not decode is ignored.
#[must_use]
pub fn connection_context_from_params(params: &Value) -> ConnectionContext {
    let access_key = AccessArgs::from_payload(params).access_key;
    let trace_context = params
        .get("traceContext")
        .and_then(Value::as_str)
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .filter(|raw| !raw.is_empty())
        .map(Bytes::from);
    ConnectionContext {
        access_key,
        trace_context,
    }
}
