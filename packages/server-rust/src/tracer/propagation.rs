//! Span context propagation formats.
//!
//! Text map: a single `uber-trace-id` header holding
//! `{trace-id}:{span-id}:{parent-span-id}:{flags}` in lowercase hex.
//!
//! Binary: big-endian `trace-id (16) | span-id (8) | parent-id (8) |
//! flags (1) | baggage-count (4)`. Baggage is neither written nor read.
//!
//! The parent-span-id field is written as zero and ignored on read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue};
use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

/// Header carrying the text-map trace context.
pub const TRACE_CONTEXT_HEADER: &str = "uber-trace-id";

/// Encoded length of a binary context without baggage.
pub const BINARY_CONTEXT_LEN: usize = 16 + 8 + 8 + 1 + 4;

/// Writes `context` into `headers`, replacing any previous value.
pub fn inject_text_map(context: &SpanContext, headers: &mut HeaderMap) {
    let value = format!(
        "{}:{}:0:{:x}",
        context.trace_id(),
        context.span_id(),
        context.trace_flags().to_u8()
    );
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(TRACE_CONTEXT_HEADER, value);
    }
}

/// Reads a context from `headers`. Missing or malformed values yield `None`.
#[must_use]
pub fn extract_text_map(headers: &HeaderMap) -> Option<SpanContext> {
    let raw = headers.get(TRACE_CONTEXT_HEADER)?.to_str().ok()?;
    parse_text(raw)
}

fn parse_text(raw: &str) -> Option<SpanContext> {
    // Some clients URL-encode the separators.
    let decoded = raw.trim().replace("%3A", ":").replace("%3a", ":");
    let mut parts = decoded.split(':');
    let trace_id = TraceId::from_hex(parts.next()?).ok()?;
    let span_id = SpanId::from_hex(parts.next()?).ok()?;
    u64::from_str_radix(parts.next()?, 16).ok()?;
    let flags = u8::from_str_radix(parts.next()?, 16).ok()?;
    if parts.next().is_some() {
        return None;
    }
    remote_context(trace_id, span_id, flags)
}

/// Encodes `context` in the binary format.
#[must_use]
pub fn inject_binary(context: &SpanContext) -> Bytes {
    let mut buf = BytesMut::with_capacity(BINARY_CONTEXT_LEN);
    buf.put_slice(&context.trace_id().to_bytes());
    buf.put_slice(&context.span_id().to_bytes());
    buf.put_u64(0);
    buf.put_u8(context.trace_flags().to_u8());
    buf.put_u32(0);
    buf.freeze()
}

/// Decodes a binary context. Short or zero-id payloads yield `None`.
#[must_use]
pub fn extract_binary(mut raw: &[u8]) -> Option<SpanContext> {
    if raw.len() < BINARY_CONTEXT_LEN - 4 {
        return None;
    }
    let trace_id = TraceId::from_bytes(raw.get_u128().to_be_bytes());
    let span_id = SpanId::from_bytes(raw.get_u64().to_be_bytes());
    raw.advance(8);
    let flags = raw.get_u8();
    remote_context(trace_id, span_id, flags)
}

fn remote_context(trace_id: TraceId, span_id: SpanId, flags: u8) -> Option<SpanContext> {
    if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
        return None;
    }
    Some(SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    ))
}
