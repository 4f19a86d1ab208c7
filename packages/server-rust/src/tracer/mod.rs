//! Distributed tracing for request contexts and operations.
//!
//! A [`Tracer`] is either a no-op (no endpoint configured) or a reporting
//! tracer backed by an OpenTelemetry SDK provider whose exporter speaks the
//! Jaeger protocols. [`QTracer`] holds the session-level helpers: building
//! a tracer from configuration, extracting the inbound parent context from
//! a transport carrier, applying the common tags, and wrapping an operation
//! in a child span.

pub mod export;
pub mod propagation;
pub mod span;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use http::HeaderMap;
use opentelemetry::trace::{TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry_sdk::trace::{Tracer as SdkTracer, TracerProvider};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use qserver_core::error::clean_error;
use qserver_core::{to_log, QError};

use crate::config::JaegerConfig;
use crate::context::carrier::TransportCarrier;
use crate::context::RequestContext;

pub use export::{MemoryExporter, MAX_AGENT_PACKET_SIZE};
pub use opentelemetry::trace::SpanContext;
pub use span::Span;

/// Operation name of the span opened for every request context.
pub const REQUEST_SPAN_NAME: &str = "q-request";

/// Standard span-kind tag key.
pub const SPAN_KIND: &str = "span.kind";

/// Default agent port when the endpoint names only a host.
pub const DEFAULT_AGENT_PORT: u16 = 6832;

/// Instrumentation scope of every span.
const INSTRUMENTATION_NAME: &str = "qserver";

struct TracerInner {
    tags: BTreeMap<String, String>,
    tracer: SdkTracer,
    provider: Mutex<Option<TracerProvider>>,
    closed: AtomicBool,
    log_spans: bool,
}

/// Span factory shared by every request context.
#[derive(Clone, Default)]
pub struct Tracer {
    inner: Option<Arc<TracerInner>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("noop", &self.is_noop())
            .finish()
    }
}

impl Tracer {
    /// A tracer whose spans record nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// A reporting tracer over `provider`. `tags` are applied by
    /// [`QTracer::attach_common_tags`]; `log_spans` logs every finished span.
    #[must_use]
    pub fn new(tags: BTreeMap<String, String>, provider: TracerProvider, log_spans: bool) -> Self {
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        Self {
            inner: Some(Arc::new(TracerInner {
                tags,
                tracer,
                provider: Mutex::new(Some(provider)),
                closed: AtomicBool::new(false),
                log_spans,
            })),
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Starts a span, as a child of `parent` when given. Once the tracer is
    /// closed, spans record nothing.
    #[must_use]
    pub fn start_span(&self, name: &str, parent: Option<SpanContext>) -> Span {
        match &self.inner {
            Some(inner) if !inner.closed.load(Ordering::Acquire) => {
                let cx = match parent {
                    Some(parent) => opentelemetry::Context::new().with_remote_span_context(parent),
                    None => opentelemetry::Context::new(),
                };
                let span = inner.tracer.start_with_context(name.to_string(), &cx);
                Span::recording(name, span, inner.log_spans)
            }
            _ => Span::noop(name),
        }
    }

    #[must_use]
    pub fn extract_text_map(&self, headers: &HeaderMap) -> Option<SpanContext> {
        self.inner.as_ref()?;
        propagation::extract_text_map(headers)
    }

    #[must_use]
    pub fn extract_binary(&self, raw: &[u8]) -> Option<SpanContext> {
        self.inner.as_ref()?;
        propagation::extract_binary(raw)
    }

    pub fn inject_text_map(&self, context: &SpanContext, headers: &mut HeaderMap) {
        if !self.is_noop() {
            propagation::inject_text_map(context, headers);
        }
    }

    #[must_use]
    pub fn inject_binary(&self, context: &SpanContext) -> Option<Bytes> {
        self.inner.as_ref()?;
        Some(propagation::inject_binary(context))
    }

    /// Exports pending spans and releases the provider. Later calls and
    /// spans started afterwards are no-ops.
    pub async fn close(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.closed.store(true, Ordering::Release);
        let Some(provider) = inner.provider.lock().take() else {
            return;
        };
        // Flushing blocks on the exporter task, so keep it off the runtime.
        let flushed = tokio::task::spawn_blocking(move || {
            let results = provider.force_flush();
            drop(provider);
            results
        })
        .await;
        match flushed {
            Ok(results) => {
                for error in results.into_iter().filter_map(Result::err) {
                    warn!(error = %error, "failed to flush spans");
                }
            }
            Err(e) => warn!(error = %e, "span flushing task failed"),
        }
    }
}

/// Sampler section of [`TracerInitConfig`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerConfig {
    #[serde(rename = "type")]
    pub sampler_type: String,
    pub param: u32,
}

/// Reporter section of [`TracerInitConfig`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_port: Option<u16>,
    pub log_spans: bool,
}

/// Tracer construction parameters derived from [`JaegerConfig`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerInitConfig {
    pub service_name: String,
    pub sampler: SamplerConfig,
    pub reporter: ReporterConfig,
}

/// Session-level tracing helpers.
pub struct QTracer;

impl QTracer {
    /// Maps configuration onto tracer parameters. An empty endpoint means
    /// no tracer at all.
    ///
    /// Endpoints starting with `http` name a collector; anything else is an
    /// agent `host[:port]`.
    #[must_use]
    pub fn jaeger_config(config: &JaegerConfig) -> Option<TracerInitConfig> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }
        let reporter = if endpoint.starts_with("http") {
            ReporterConfig {
                collector_endpoint: Some(endpoint.to_string()),
                agent_host: None,
                agent_port: None,
                log_spans: true,
            }
        } else {
            let (host, port) = match endpoint.rsplit_once(':') {
                Some((host, port)) => match port.parse::<u16>() {
                    Ok(port) => (host, port),
                    Err(_) => (endpoint, DEFAULT_AGENT_PORT),
                },
                None => (endpoint, DEFAULT_AGENT_PORT),
            };
            ReporterConfig {
                collector_endpoint: None,
                agent_host: Some(host.to_string()),
                agent_port: Some(port),
                log_spans: true,
            }
        };
        Some(TracerInitConfig {
            service_name: config.service.clone(),
            sampler: SamplerConfig {
                sampler_type: "const".to_string(),
                param: 1,
            },
            reporter,
        })
    }

    /// Builds the tracer for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reporting tracer is configured outside a tokio
    /// runtime, or its exporter cannot be built.
    pub fn create(config: &JaegerConfig) -> anyhow::Result<Tracer> {
        let Some(init) = Self::jaeger_config(config) else {
            return Ok(Tracer::noop());
        };
        tokio::runtime::Handle::try_current()
            .context("span exporter requires a running tokio runtime")?;

        let provider = export::jaeger_provider(&init, config)
            .with_context(|| format!("failed to build span exporter for `{}`", config.endpoint))?;
        info!(
            service = %init.service_name,
            endpoint = %config.endpoint,
            "span reporting enabled"
        );
        Ok(Tracer::new(config.tags.clone(), provider, init.reporter.log_spans))
    }

    /// Inbound parent context: text map for header carriers, binary for
    /// persistent-connection carriers.
    #[must_use]
    pub fn extract_parent_span(tracer: &Tracer, carrier: &TransportCarrier) -> Option<SpanContext> {
        match carrier {
            TransportCarrier::Http(http) => tracer.extract_text_map(&http.headers),
            TransportCarrier::Connection(conn) => conn
                .context
                .trace_context
                .as_deref()
                .and_then(|raw| tracer.extract_binary(raw)),
        }
    }

    /// Applies the configured static tags and `span.kind=server`.
    pub fn attach_common_tags(tracer: &Tracer, span: &Span) {
        span.set_tag(SPAN_KIND, "server");
        if let Some(inner) = &tracer.inner {
            for (name, value) in inner.tags.iter().filter(|(name, _)| !name.is_empty()) {
                span.set_tag(name, value.as_str());
            }
        }
    }

    /// Parent for operation spans: the request span of `context`.
    #[must_use]
    pub fn get_parent_span(context: &RequestContext) -> Option<SpanContext> {
        context.request_span().context()
    }

    /// Logs a sanitized failure onto `span` as a `failed` event.
    pub fn failed(span: &Span, error: &QError) {
        span.log_event("failed", json!({ "payload": to_log(error) }));
    }

    /// Runs `op` inside a child span of `parent`.
    ///
    /// A successful result is tagged as `result` unless its projection is
    /// empty. A failure is cleaned, logged onto the span and returned. The
    /// span is finished exactly once, also when the returned future is
    /// dropped before completion.
    ///
    /// # Errors
    ///
    /// Returns the cleaned error produced by `op`.
    pub async fn trace<T, F, Fut>(
        tracer: &Tracer,
        name: &str,
        op: F,
        parent: Option<SpanContext>,
    ) -> Result<T, QError>
    where
        T: Serialize,
        F: FnOnce(Span) -> Fut,
        Fut: Future<Output = Result<T, QError>>,
    {
        let span = tracer.start_span(name, parent);
        let guard = FinishGuard(span.clone());
        Self::attach_common_tags(tracer, &span);

        let outcome = op(span.clone()).await;
        match outcome {
            Ok(result) => {
                if let Some(value) = to_log(&result).filter(|v| !v.is_null()) {
                    span.set_tag("result", value);
                }
                drop(guard);
                Ok(result)
            }
            Err(error) => {
                let cleaned = clean_error(error);
                Self::failed(&span, &cleaned);
                drop(guard);
                Err(cleaned)
            }
        }
    }
}

/// Finishes the span when dropped.
struct FinishGuard(Span);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}
