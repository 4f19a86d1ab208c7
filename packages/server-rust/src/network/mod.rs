//! Transport adapters: HTTP extractor, connection handshake and error responses.

pub mod extract;
pub mod handshake;
pub mod response;

pub use extract::HttpCarrier;
pub use handshake::connection_context_from_params;
pub use response::ErrorResponse;
