//! Span handles.
//!
//! A [`Span`] is a cheap, cloneable handle around an OpenTelemetry SDK span.
//! Spans of the no-op tracer accept every call and record nothing. Either
//! way a span finishes at most once, and only that first finish ends the
//! underlying span and hands it to the exporter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opentelemetry::trace::{Span as _, SpanContext};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::Span as SdkSpan;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

struct SpanInner {
    operation_name: String,
    context: Option<SpanContext>,
    span: Mutex<Option<SdkSpan>>,
    finished: AtomicBool,
    log_spans: bool,
}

/// Handle to a timed, taggable unit of trace data.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("operation_name", &self.inner.operation_name)
            .field("context", &self.inner.context)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Span {
    pub(crate) fn recording(operation_name: &str, span: SdkSpan, log_spans: bool) -> Self {
        let context = Some(span.span_context().clone());
        Self::build(operation_name, context, Some(span), log_spans)
    }

    /// A span that records nothing.
    #[must_use]
    pub fn noop(operation_name: &str) -> Self {
        Self::build(operation_name, None, None, false)
    }

    fn build(
        operation_name: &str,
        context: Option<SpanContext>,
        span: Option<SdkSpan>,
        log_spans: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                operation_name: operation_name.to_string(),
                context,
                span: Mutex::new(span),
                finished: AtomicBool::new(false),
                log_spans,
            }),
        }
    }

    #[must_use]
    pub fn operation_name(&self) -> &str {
        &self.inner.operation_name
    }

    /// Propagation context; `None` for no-op spans.
    #[must_use]
    pub fn context(&self) -> Option<SpanContext> {
        self.inner.context.clone()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.context.is_some()
    }

    /// Sets an attribute. Strings, booleans and numbers keep their type;
    /// anything else is stored as its JSON text.
    pub fn set_tag(&self, key: &str, value: impl Into<Value>) {
        if let Some(span) = self.inner.span.lock().as_mut() {
            span.set_attribute(KeyValue::new(key.to_string(), attribute_value(value.into())));
        }
    }

    /// Adds an event named `name`. Each field of an object becomes an event
    /// attribute; any other value is stored under `message`.
    pub fn log_event(&self, name: &str, fields: Value) {
        if let Some(span) = self.inner.span.lock().as_mut() {
            let attributes = match fields {
                Value::Object(map) => map
                    .into_iter()
                    .map(|(key, value)| KeyValue::new(key, attribute_value(value)))
                    .collect(),
                Value::Null => Vec::new(),
                other => vec![KeyValue::new("message", attribute_value(other))],
            };
            span.add_event(name.to_string(), attributes);
        }
    }

    /// Ends the span and hands it to the exporter.
    ///
    /// Returns `true` only for the call that actually finished the span;
    /// later calls are no-ops.
    pub fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let span = self.inner.span.lock().take();
        if let Some(mut span) = span {
            if self.inner.log_spans {
                let context = span.span_context();
                info!(
                    trace_id = %context.trace_id(),
                    span_id = %context.span_id(),
                    operation = %self.inner.operation_name,
                    "reporting span"
                );
            }
            span.end();
        }
        true
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }
}

fn attribute_value(value: Value) -> opentelemetry::Value {
    match value {
        Value::Bool(b) => b.into(),
        Value::String(s) => s.into(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.into(),
            (None, Some(f)) => f.into(),
            (None, None) => n.to_string().into(),
        },
        other => other.to_string().into(),
    }
}
