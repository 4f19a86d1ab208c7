//! The full session middleware stack around a domain service.

use tower::ServiceBuilder;

use qserver_core::QError;

use super::access::AccessLayer;
use super::metrics::MetricsLayer;
use super::sanitize::SanitizeLayer;
use super::trace::TraceLayer;
use crate::service::operation::{Operation, OperationResponse};

/// Wraps a domain service with the session middleware.
///
/// Layer order (outermost to innermost):
/// 1. `SanitizeLayer` -- log failures, hide internal faults from the caller
/// 2. `TraceLayer` -- child span of the request span per operation
/// 3. `MetricsLayer` -- count and time operations
/// 4. `AccessLayer` -- authorize before the domain service runs
#[must_use]
pub fn build_operation_pipeline<S>(
    domain: S,
) -> impl tower::Service<Operation, Response = OperationResponse, Error = QError> + Clone
where
    S: tower::Service<Operation, Response = OperationResponse, Error = QError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(SanitizeLayer)
        .layer(TraceLayer)
        .layer(MetricsLayer)
        .layer(AccessLayer)
        .service(domain)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
