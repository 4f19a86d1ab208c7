//! Q-Server session layer: request contexts, authorization, tracing and
//! error sanitization shared by every protocol endpoint.

pub mod auth;
pub mod config;
pub mod context;
pub mod logging;
pub mod network;
pub mod service;
pub mod stats;
pub mod tracer;

#[cfg(test)]
mod test_support;

pub use auth::Auth;
pub use config::{ConfigArgs, QConfig};
pub use context::carrier::TransportCarrier;
pub use context::{RequestContext, RequestServices};
pub use network::{ErrorResponse, HttpCarrier};
pub use stats::QStats;
pub use tracer::{QTracer, Span, Tracer};
