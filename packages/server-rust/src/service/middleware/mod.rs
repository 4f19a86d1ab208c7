//! Tower middleware layers for the operation pipeline.
//!
//! - [`sanitize`]: Failure logging and internal-fault hiding
//! - [`trace`]: Per-operation child spans
//! - [`metrics`]: Operation counters and timings
//! - [`access`]: Authorization by access requirement
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod access;
pub mod metrics;
pub mod pipeline;
pub mod sanitize;
pub mod trace;

pub use access::AccessLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_operation_pipeline;
pub use sanitize::SanitizeLayer;
pub use trace::TraceLayer;
