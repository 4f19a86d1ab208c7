//! Tracing middleware: one child span of the request span per operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use qserver_core::QError;

use crate::service::operation::{Operation, OperationResponse};
use crate::tracer::QTracer;

/// Tower layer running each operation inside [`QTracer::trace`].
#[derive(Debug, Clone)]
pub struct TraceLayer;

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
}

impl<S> Service<Operation> for TraceService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = QError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = QError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, QError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut op: Operation) -> Self::Future {
        // The span only exists inside `trace`, so the ready service moves
        // into the future and a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tracer = op.ctx().services().tracer.clone();
        let parent = QTracer::get_parent_span(op.ctx());
        let name = op.name().to_string();

        Box::pin(async move {
            QTracer::trace(
                &tracer,
                &name,
                move |span| {
                    op.set_span(span);
                    inner.call(op)
                },
                parent,
            )
            .await
        })
    }
}
