//! Span export: Jaeger collector and agent pipelines, plus an in-memory
//! exporter.
//!
//! Remote pipelines never block the request path. Ended spans go to a
//! bounded batch queue drained on the tokio runtime every flush interval or
//! whenever a batch fills up. A full queue drops the span. Agent batches
//! are Thrift-encoded and split so that every UDP datagram stays within
//! [`MAX_AGENT_PACKET_SIZE`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, Config, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use parking_lot::Mutex;

use super::{TracerInitConfig, DEFAULT_AGENT_PORT};
use crate::config::JaegerConfig;

/// Largest UDP payload sent to an agent.
pub const MAX_AGENT_PACKET_SIZE: usize = 65_000;

/// Queue slots per batch; the queue holds this many batches in flight.
const QUEUE_BATCHES: usize = 10;

/// Builds a provider exporting to the collector or agent named by `init`,
/// batching per `config`. Must be called within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the agent address does not resolve or the exporter
/// cannot be built.
pub fn jaeger_provider(
    init: &TracerInitConfig,
    config: &JaegerConfig,
) -> Result<TracerProvider, TraceError> {
    let resource = process_resource(config);
    let exporter = match &init.reporter.collector_endpoint {
        Some(endpoint) => opentelemetry_jaeger::new_collector_pipeline()
            .with_endpoint(endpoint.as_str())
            .with_service_name(init.service_name.clone())
            .with_trace_config(Config::default().with_resource(resource.clone()))
            .with_reqwest()
            .build_collector_exporter::<runtime::Tokio>()?,
        None => {
            let host = init.reporter.agent_host.as_deref().unwrap_or("localhost");
            let port = init.reporter.agent_port.unwrap_or(DEFAULT_AGENT_PORT);
            opentelemetry_jaeger::new_agent_pipeline()
                .with_endpoint(format!("{host}:{port}"))
                .with_service_name(init.service_name.clone())
                .with_trace_config(Config::default().with_resource(resource.clone()))
                .with_max_packet_size(MAX_AGENT_PACKET_SIZE)
                .with_auto_split_batch(true)
                .build_async_agent_exporter(runtime::Tokio)?
        }
    };

    let batch = config.max_batch_size.max(1);
    let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_max_queue_size(batch.saturating_mul(QUEUE_BATCHES))
                .with_max_export_batch_size(batch)
                .with_scheduled_delay(Duration::from_millis(config.flush_interval_ms.max(1)))
                .build(),
        )
        .build();
    Ok(TracerProvider::builder()
        .with_span_processor(processor)
        .with_config(
            Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(resource),
        )
        .build())
}

/// Process tags reported with every batch. Unnamed tags are skipped.
fn process_resource(config: &JaegerConfig) -> Resource {
    Resource::new(
        config
            .tags
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| KeyValue::new(name.clone(), value.clone())),
    )
}

/// Keeps every exported span in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl MemoryExporter {
    /// A provider exporting each span to this exporter as soon as it ends.
    #[must_use]
    pub fn provider(&self) -> TracerProvider {
        TracerProvider::builder()
            .with_simple_exporter(self.clone())
            .build()
    }

    #[must_use]
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().clone()
    }

    /// Exported spans with the given operation name.
    #[must_use]
    pub fn named(&self, operation_name: &str) -> Vec<SpanData> {
        self.spans
            .lock()
            .iter()
            .filter(|span| span.name == operation_name)
            .cloned()
            .collect()
    }
}

impl SpanExporter for MemoryExporter {
    fn export(
        &mut self,
        batch: Vec<SpanData>,
    ) -> Pin<Box<dyn Future<Output = ExportResult> + Send + 'static>> {
        self.spans.lock().extend(batch);
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use axum::body::Bytes;
    use axum::http::{header, HeaderMap};
    use axum::routing::post;
    use axum::Router;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::test_support::serve;
    use crate::tracer::{QTracer, Tracer};

    fn jaeger(endpoint: String, max_batch_size: usize) -> JaegerConfig {
        JaegerConfig {
            endpoint,
            service: "Q Server".to_string(),
            tags: BTreeMap::from([("dc".to_string(), "eu".to_string())]),
            flush_interval_ms: 60_000,
            max_batch_size,
        }
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    #[test]
    fn memory_exporter_filters_by_name() {
        let exporter = MemoryExporter::default();
        let tracer = Tracer::new(BTreeMap::new(), exporter.provider(), false);
        tracer.start_span("a", None).finish();
        tracer.start_span("b", None).finish();
        assert_eq!(exporter.spans().len(), 2);
        assert_eq!(exporter.named("b").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn collector_receives_thrift_batch_on_close() {
        let received = Arc::new(Mutex::new(Vec::<(String, Bytes)>::new()));
        let sink = Arc::clone(&received);
        let router = Router::new().route(
            "/api/traces",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = Arc::clone(&sink);
                async move {
                    let content_type = headers
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    sink.lock().push((content_type, body));
                }
            }),
        );
        let addr = serve(router).await;

        let tracer = QTracer::create(&jaeger(format!("http://{addr}/api/traces"), 100)).unwrap();
        tracer.start_span("q-request", None).finish();
        tracer.start_span("blocks", None).finish();
        tracer.close().await;

        let batches = received.lock().clone();
        assert_eq!(batches.len(), 1);
        let (content_type, body) = &batches[0];
        assert!(content_type.contains("thrift"), "{content_type}");
        assert!(contains(body, "Q Server"));
        assert!(contains(body, "q-request"));
        assert!(contains(body, "blocks"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_agent_batch_is_split_across_datagrams() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = agent.local_addr().unwrap().port();

        let tracer = QTracer::create(&jaeger(format!("127.0.0.1:{port}"), 500)).unwrap();
        let padding = "x".repeat(2_048);
        let names: Vec<String> = (0..40).map(|i| format!("bulk-{i:02}")).collect();
        for name in &names {
            let span = tracer.start_span(name, None);
            span.set_tag("padding", padding.as_str());
            span.finish();
        }
        tracer.close().await;

        let mut datagrams = Vec::new();
        let mut buf = vec![0u8; 65_536];
        while let Ok(Ok((len, _))) =
            tokio::time::timeout(Duration::from_millis(500), agent.recv_from(&mut buf)).await
        {
            datagrams.push(buf[..len].to_vec());
        }

        assert!(datagrams.len() >= 2, "got {} datagrams", datagrams.len());
        assert!(datagrams.iter().all(|d| d.len() <= MAX_AGENT_PACKET_SIZE));
        let delivered: HashSet<&String> = names
            .iter()
            .filter(|name| datagrams.iter().any(|d| contains(d, name)))
            .collect();
        assert_eq!(delivered.len(), names.len());
    }

    #[tokio::test]
    async fn spans_after_close_are_not_exported() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = agent.local_addr().unwrap().port();
        let tracer = QTracer::create(&jaeger(format!("127.0.0.1:{port}"), 10)).unwrap();
        tracer.close().await;

        let late = tracer.start_span("late", None);
        assert!(late.context().is_none());
        late.finish();
        let mut buf = [0u8; 1_024];
        assert!(
            tokio::time::timeout(Duration::from_millis(100), agent.recv_from(&mut buf))
                .await
                .is_err()
        );
    }
}
