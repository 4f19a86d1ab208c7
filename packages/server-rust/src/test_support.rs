//! Local stub servers and span helpers shared by unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use opentelemetry::trace::{Event, SpanContext, SpanId, TraceFlags, TraceId, TraceState};
use opentelemetry::KeyValue;
use opentelemetry_sdk::export::trace::SpanData;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral localhost port.
pub(crate) async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

type Responder = Arc<dyn Fn(&Value) -> (StatusCode, String) + Send + Sync>;

#[derive(Clone)]
struct StubState {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
    respond: Responder,
}

/// A JSON-RPC endpoint standing in for the authorization service.
pub(crate) struct AuthStub {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl AuthStub {
    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }
}

async fn handle(State(state): State<StubState>, body: String) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let (status, body) = (state.respond)(&request);
    state.requests.lock().push(request);
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

/// Starts a stub answering every call through `respond`.
pub(crate) async fn auth_stub<F>(respond: F) -> AuthStub
where
    F: Fn(&Value) -> (StatusCode, String) + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        calls: Arc::clone(&calls),
        requests: Arc::clone(&requests),
        respond: Arc::new(respond),
    };
    let router = Router::new().route("/", post(handle)).with_state(state);
    let addr = serve(router).await;
    AuthStub {
        addr,
        calls,
        requests,
    }
}

/// A JSON-RPC success envelope.
pub(crate) fn rpc_result(result: &Value) -> (StatusCode, String) {
    (
        StatusCode::OK,
        json!({"jsonrpc": "2.0", "id": "1", "result": result}).to_string(),
    )
}

/// A stub granting `getAccessRights` to exactly the listed keys.
pub(crate) async fn granting_auth_stub(keys: &[&str]) -> AuthStub {
    let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
    auth_stub(move |request| {
        let key = request["params"]["accessKey"].as_str().unwrap_or_default();
        rpc_result(&json!({"granted": keys.iter().any(|k| k == key)}))
    })
    .await
}

/// A sampled context as an upstream service would propagate it.
pub(crate) fn remote_parent() -> SpanContext {
    SpanContext::new(
        TraceId::from_bytes(rand::random::<u128>().max(1).to_be_bytes()),
        SpanId::from_bytes(rand::random::<u64>().max(1).to_be_bytes()),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    )
}

fn json_of(attributes: &[KeyValue], key: &str) -> Option<Value> {
    let value = &attributes.iter().find(|kv| kv.key.as_str() == key)?.value;
    Some(match value {
        opentelemetry::Value::Bool(b) => json!(b),
        opentelemetry::Value::I64(i) => json!(i),
        opentelemetry::Value::F64(f) => json!(f),
        other => {
            let text = other.as_str();
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
        }
    })
}

/// A span attribute as JSON; JSON-encoded strings are decoded.
pub(crate) fn attribute(span: &SpanData, key: &str) -> Option<Value> {
    json_of(&span.attributes, key)
}

/// An event attribute as JSON; JSON-encoded strings are decoded.
pub(crate) fn event_attribute(event: &Event, key: &str) -> Option<Value> {
    json_of(&event.attributes, key)
}
