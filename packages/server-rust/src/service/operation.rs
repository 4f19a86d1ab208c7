//! Operations flowing through the session pipeline.

use std::sync::Arc;

use serde_json::Value;

use qserver_core::{AccessArgs, AccessRights};

use crate::context::RequestContext;
use crate::tracer::Span;

/// How an operation must be authorized before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRequirement {
    /// Remote access-rights resolution; the rights must be granted.
    #[default]
    Granted,
    /// Management allow-set membership.
    Mam,
    /// No authorization.
    None,
}

/// Result value of an operation.
pub type OperationResponse = Value;

/// One unit of work (query, mutation or subscription) on a request context.
#[derive(Debug)]
pub struct Operation {
    ctx: Arc<RequestContext>,
    name: String,
    args: AccessArgs,
    payload: Value,
    access: AccessRequirement,
    rights: Option<AccessRights>,
    span: Option<Span>,
}

impl Operation {
    /// Creates an operation requiring granted access. The credential is read
    /// from the `accessKey` field of `payload`, falling back to `accesskey`.
    #[must_use]
    pub fn new(ctx: Arc<RequestContext>, name: impl Into<String>, payload: Value) -> Self {
        let args = AccessArgs::from_payload(&payload);
        Self {
            ctx,
            name: name.into(),
            args,
            payload,
            access: AccessRequirement::default(),
            rights: None,
            span: None,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: AccessRequirement) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn ctx(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn args(&self) -> &AccessArgs {
        &self.args
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn access(&self) -> AccessRequirement {
        self.access
    }

    /// Rights resolved by the access layer, for [`AccessRequirement::Granted`].
    #[must_use]
    pub fn rights(&self) -> Option<&AccessRights> {
        self.rights.as_ref()
    }

    pub(crate) fn set_rights(&mut self, rights: AccessRights) {
        self.rights = Some(rights);
    }

    /// Span of this operation, set by the trace layer.
    #[must_use]
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub(crate) fn set_span(&mut self, span: Span) {
        self.span = Some(span);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::service::middleware::tests::op;

    #[test]
    fn credential_read_from_either_spelling() {
        assert_eq!(op("blocks", json!({"accessKey": "k1"})).args().key(), Some("k1"));
        assert_eq!(op("blocks", json!({"accesskey": "k2"})).args().key(), Some("k2"));
        let both = op("blocks", json!({"accessKey": "k1", "accesskey": "k1"}));
        assert_eq!(both.args().key(), Some("k1"));
    }

    #[test]
    fn malformed_credential_is_absent() {
        assert_eq!(op("blocks", json!({"accessKey": 42})).args().key(), None);
        assert_eq!(op("blocks", json!("scalar")).args().key(), None);
        let numeric = op("blocks", json!({"accessKey": 42}));
        assert_eq!(numeric.payload()["accessKey"], 42);
    }
}
