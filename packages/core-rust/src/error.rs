//! Error normalization: classification, sanitization and re-tagging of failures.
//!
//! Every failure that may cross the trust boundary is funneled through
//! [`clean_error`] and [`wrap`]. Internal fault signatures (OS-level I/O
//! errors, `system`-typed transport failures) are logged in full on the
//! server and replaced with a generic [`QError::service_unavailable`]
//! before reaching the caller.

use std::future::Future;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::logs::QLog;
use crate::to_log::to_log;

/// Classification used when an error does not name its own source.
pub const DEFAULT_ERROR_SOURCE: &str = "graphql";

/// Marker stored in [`QError::error_type`] for system-level transport faults.
pub const SYSTEM_ERROR_TYPE: &str = "system";

/// Tagged error carrying a numeric `code` and a `source` classification.
///
/// Optional fields mirror the shapes collaborators produce: an OS-level
/// `errno`/`syscall` signature, a `type` marker, a nested store-specific
/// payload, and raw transport request/response objects that must never
/// be logged or returned as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct QError {
    /// Numeric classification (HTTP-like for local errors, opaque for remote ones).
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Source classification (`graphql` unless the remote side says otherwise).
    #[serde(rename = "source")]
    pub origin: String,
    /// Transport fault marker; `Some("system")` classifies the error as internal.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// OS error name, e.g. `ECONNRESET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
    /// Failing system call, e.g. `read`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall: Option<String>,
    /// Store-specific error wrapped by this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_error: Option<Box<QError>>,
    /// Raw outbound request attached by a transport client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    /// Raw inbound response attached by a transport client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl QError {
    /// Creates an error with the default `graphql` source.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        create_error(code, message, DEFAULT_ERROR_SOURCE)
    }

    /// Replaces the source classification.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.origin = source.into();
        self
    }

    /// Source classification of this error.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.origin
    }

    /// 401: missing, invalid or denied credential.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 400: more than one credential was presented within one session.
    #[must_use]
    pub fn multiple_access_keys() -> Self {
        Self::new(
            400,
            "Request must use the same access key for all queries and mutations",
        )
    }

    /// 500: generic replacement for sanitized internal faults.
    #[must_use]
    pub fn service_unavailable() -> Self {
        Self::new(500, "Service temporary unavailable")
    }

    /// 500: administrative call attempted without a configured auth endpoint.
    #[must_use]
    pub fn auth_service_unavailable() -> Self {
        Self::new(500, "Auth service unavailable")
    }

    /// A transport fault tagged with `type = "system"`.
    pub fn system(message: impl Into<String>) -> Self {
        let mut error = Self::new(500, message);
        error.error_type = Some(SYSTEM_ERROR_TYPE.to_string());
        error
    }

    /// An OS-level I/O failure carrying an `errno`/`syscall` signature.
    pub fn os(errno: impl Into<String>, syscall: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(500, message);
        error.errno = Some(errno.into());
        error.syscall = Some(syscall.into());
        error
    }

    /// Wraps a store-specific error; [`clean_error`] unwraps it again.
    #[must_use]
    pub fn store(inner: QError) -> Self {
        let mut error = Self::new(inner.code, inner.message.clone());
        error.store_error = Some(Box::new(inner));
        error
    }

    /// Attaches raw transport objects.
    #[must_use]
    pub fn with_transport(mut self, request: Option<Value>, response: Option<Value>) -> Self {
        self.request = request;
        self.response = response;
        self
    }

    /// Converts an I/O error, recording the system call that failed.
    #[must_use]
    pub fn from_io(err: &io::Error, syscall: &str) -> Self {
        Self::os(errno_name(err), syscall, err.to_string())
    }
}

impl From<io::Error> for QError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err, "io")
    }
}

/// Maps an I/O error to its conventional `errno` name.
fn errno_name(err: &io::Error) -> String {
    let name = match err.kind() {
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::NotConnected => "ENOTCONN",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::AddrInUse => "EADDRINUSE",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        _ => {
            return err
                .raw_os_error()
                .map_or_else(|| "EIO".to_string(), |code| format!("E{code}"));
        }
    };
    name.to_string()
}

/// Constructs a tagged error with an explicit source classification.
pub fn create_error(code: i64, message: impl Into<String>, source: &str) -> QError {
    QError {
        code,
        message: message.into(),
        origin: source.to_string(),
        error_type: None,
        errno: None,
        syscall: None,
        store_error: None,
        request: None,
        response: None,
    }
}

/// Sanitizes an error before it is logged, traced or returned.
///
/// A nested store-specific error is unwrapped and returned in place of its
/// wrapper. Otherwise raw transport request/response objects are stripped.
#[must_use]
pub fn clean_error(mut error: QError) -> QError {
    if let Some(inner) = error.store_error.take() {
        return *inner;
    }
    error.request = None;
    error.response = None;
    error
}

/// Returns `true` for internal faults that must not reach a caller:
/// a `type == "system"` marker, or an `errno` + `syscall` signature.
#[must_use]
pub fn is_internal_server_error(error: &QError) -> bool {
    if error.error_type.as_deref() == Some(SYSTEM_ERROR_TYPE) {
        return true;
    }
    error.errno.is_some() && error.syscall.is_some()
}

/// Runs `fetch`, funneling any failure through the sanitization pipeline.
///
/// On failure the error is cleaned and logged as `FAILED` with the operation
/// name, its arguments and the cleaned error. Internal faults are then
/// replaced with [`QError::service_unavailable`].
///
/// # Errors
///
/// Returns the cleaned error, or the generic 500 replacement when the
/// cleaned error is classified as internal.
pub async fn wrap<T, E, A, F>(log: &QLog, op: &str, args: &A, fetch: F) -> Result<T, QError>
where
    A: Serialize + ?Sized,
    E: Into<QError>,
    F: Future<Output = Result<T, E>>,
{
    match fetch.await {
        Ok(value) => Ok(value),
        Err(err) => {
            let cleaned = clean_error(err.into());
            log.error(
                "FAILED",
                &json!({
                    "op": op,
                    "args": to_log(args),
                    "error": to_log(&cleaned),
                }),
            );
            if is_internal_server_error(&cleaned) {
                return Err(QError::service_unavailable());
            }
            Err(cleaned)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;

    /// Captures the `data` field of every emitted event.
    struct CaptureLayer {
        captured: Arc<Mutex<Vec<String>>>,
    }

    struct DataVisitor<'a>(&'a mut Option<String>);

    impl Visit for DataVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "data" {
                *self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut data = None;
            event.record(&mut DataVisitor(&mut data));
            if let Some(data) = data {
                self.captured.lock().push(data);
            }
        }
    }

    #[test]
    fn create_error_defaults_to_graphql_source() {
        let err = QError::new(401, "Unauthorized");
        assert_eq!(err.code, 401);
        assert_eq!(err.source_name(), "graphql");
        assert_eq!(err.to_string(), "Unauthorized");

        let err = create_error(403, "Forbidden", "auth");
        assert_eq!(err.source_name(), "auth");
    }

    #[test]
    fn clean_error_unwraps_store_payload() {
        let inner = create_error(1202, "document not found", "arango");
        let wrapped = QError::store(inner.clone())
            .with_transport(Some(json!({"url": "/_api"})), None);
        assert_eq!(clean_error(wrapped), inner);
    }

    #[test]
    fn clean_error_strips_transport_objects() {
        let err = QError::new(502, "bad gateway")
            .with_transport(Some(json!({"socket": "fd"})), Some(json!({"body": "..."})));
        let cleaned = clean_error(err);
        assert!(cleaned.request.is_none());
        assert!(cleaned.response.is_none());
        assert_eq!(cleaned.message, "bad gateway");
    }

    #[test]
    fn internal_classification() {
        assert!(is_internal_server_error(&QError::system("socket hang up")));
        assert!(is_internal_server_error(&QError::os("ECONNRESET", "read", "reset")));
        assert!(!is_internal_server_error(&QError::unauthorized()));

        let mut errno_only = QError::new(500, "x");
        errno_only.errno = Some("EPIPE".to_string());
        assert!(!is_internal_server_error(&errno_only));
    }

    #[test]
    fn io_error_maps_to_errno_signature() {
        let err: QError = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();
        assert_eq!(err.errno.as_deref(), Some("ECONNRESET"));
        assert_eq!(err.syscall.as_deref(), Some("io"));
        assert!(is_internal_server_error(&err));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let value = serde_json::to_value(QError::os("ECONNRESET", "read", "boom")).unwrap();
        assert_eq!(value["source"], "graphql");
        assert_eq!(value["errno"], "ECONNRESET");
        assert!(value.get("type").is_none());
        assert!(value.get("request").is_none());
    }

    #[tokio::test]
    async fn wrap_passes_success_through() {
        let log = QLog::new("test");
        let result: Result<u32, QError> = wrap(&log, "op", &json!({}), async { Ok::<_, QError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn wrap_sanitizes_system_faults_and_logs_detail() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(CaptureLayer {
            captured: Arc::clone(&captured),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let log = QLog::new("db");
        let result: Result<(), QError> = wrap(&log, "blocks", &json!({"limit": 10}), async {
            Err(QError::os("ECONNRESET", "read", "read ECONNRESET"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "Service temporary unavailable");
        assert!(err.errno.is_none());

        let logged = captured.lock().join("\n");
        assert!(logged.contains("ECONNRESET"));
        assert!(logged.contains("blocks"));
    }

    #[tokio::test]
    async fn wrap_passes_classified_errors_cleaned() {
        let log = QLog::new("db");
        let result: Result<(), QError> = wrap(&log, "op", "args", async {
            Err(QError::store(create_error(1202, "not found", "arango")))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code, 1202);
        assert_eq!(err.source_name(), "arango");
    }
}
