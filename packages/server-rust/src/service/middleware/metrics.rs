//! Metrics middleware for operations.
//!
//! Counts operations by name and outcome and records their duration through
//! the stats sink of the request context, then logs a summary line.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};

use qserver_core::QError;

use crate::service::operation::{Operation, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with counters and timings.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = QError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = QError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, QError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let stats = op.ctx().services().stats.clone();
        let request_id = op.ctx().id();
        let name = op.name().to_string();
        let fut = self.inner.call(op);

        Box::pin(async move {
            let op_tag = format!("op:{name}");
            let started = Instant::now();
            let stop = stats.timing("operation.time", &[op_tag.as_str()]).start();
            let result = fut.await;
            stop();

            let outcome = match &result {
                Ok(_) => "ok",
                Err(_) => "error",
            };
            let outcome_tag = format!("outcome:{outcome}");
            stats
                .counter("operation.count", &[op_tag.as_str(), outcome_tag.as_str()])
                .increment();

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::info!(
                operation = %name,
                request_id = %request_id,
                duration_ms,
                outcome,
                "operation complete"
            );

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
