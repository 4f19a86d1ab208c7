//! Error sanitization middleware.
//!
//! Outermost layer: every failure leaving the pipeline goes through
//! [`wrap`], so internal fault signatures never reach the caller.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use qserver_core::error::wrap;
use qserver_core::{to_log, QError};

use crate::service::operation::{Operation, OperationResponse};

// ---------------------------------------------------------------------------
// SanitizeLayer
// ---------------------------------------------------------------------------

/// Tower layer funneling operation failures through [`wrap`].
#[derive(Debug, Clone)]
pub struct SanitizeLayer;

impl<S> Layer<S> for SanitizeLayer {
    type Service = SanitizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SanitizeService { inner }
    }
}

// ---------------------------------------------------------------------------
// SanitizeService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SanitizeService<S> {
    inner: S,
}

impl<S> Service<Operation> for SanitizeService<S>
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
        let log = op.ctx().services().log.clone();
        let name = op.name().to_string();
        let args = to_log(op.payload());
        let fut = self.inner.call(op);
        Box::pin(async move { wrap(&log, &name, &args, fut).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
