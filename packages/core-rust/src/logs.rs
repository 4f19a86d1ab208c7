//! Named loggers on top of `tracing`.
//!
//! A [`QLog`] tags every event with the name of the component that owns it
//! (`server`, `auth`, `db`, ...) so one subscriber can filter and route them.

use std::sync::Arc;

use serde_json::Value;

/// A named logger emitting `tracing` events with `log = <name>`.
#[derive(Debug, Clone)]
pub struct QLog {
    name: Arc<str>,
}

impl QLog {
    /// Creates a logger for the given component name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// Component name attached to every event.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self, event: &str, data: &Value) {
        tracing::debug!(log = %self.name, event, data = %data);
    }

    pub fn info(&self, event: &str, data: &Value) {
        tracing::info!(log = %self.name, event, data = %data);
    }

    pub fn warn(&self, event: &str, data: &Value) {
        tracing::warn!(log = %self.name, event, data = %data);
    }

    pub fn error(&self, event: &str, data: &Value) {
        tracing::error!(log = %self.name, event, data = %data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_keeps_name() {
        let log = QLog::new("server");
        assert_eq!(log.name(), "server");
        let cloned = log.clone();
        assert_eq!(cloned.name(), "server");
    }

    #[test]
    fn logging_without_subscriber_is_a_no_op() {
        let log = QLog::new("auth");
        log.debug("STARTED", &Value::Null);
        log.error("FAILED", &serde_json::json!({"code": 500}));
    }
}
