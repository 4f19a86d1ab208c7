//! Q-Server core: error normalization, log projection, identifier registry
//! and the access-rights model shared by every request context.

pub mod access;
pub mod clock;
pub mod error;
pub mod logs;
pub mod registry;
pub mod to_log;

pub use access::{AccessArgs, AccessKey, AccessRights, DENIED_ACCESS, GRANTED_ACCESS};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use error::{clean_error, create_error, is_internal_server_error, wrap, QError};
pub use logs::QLog;
pub use registry::{RegistryMap, MAX_SAFE_INTEGER};
pub use to_log::to_log;

