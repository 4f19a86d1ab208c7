//! Operation pipeline.
//!
//! Every operation a protocol endpoint dispatches on a request context
//! passes through the same tower stack before reaching its domain service:
//!
//! 1. **Operation** (`operation`): context, name, payload and access requirement
//! 2. **Middleware** (`middleware`): sanitize, trace, metrics and access layers

pub mod middleware;
pub mod operation;

pub use middleware::build_operation_pipeline;
pub use operation::{AccessRequirement, Operation, OperationResponse};
