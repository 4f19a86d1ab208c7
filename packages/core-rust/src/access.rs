//! Access-rights data model shared by the authorization client and the
//! request context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload fields that may carry a credential, in lookup order.
pub const ACCESS_KEY_FIELDS: [&str; 2] = ["accessKey", "accesskey"];

/// Result of resolving a credential.
///
/// An empty `restrict_to_accounts` list means the caller is not restricted
/// to particular accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRights {
    pub granted: bool,
    #[serde(default)]
    pub restrict_to_accounts: Vec<String>,
}

/// Fully granted, unrestricted access.
pub const GRANTED_ACCESS: AccessRights = AccessRights {
    granted: true,
    restrict_to_accounts: Vec::new(),
};

/// Fully denied access.
pub const DENIED_ACCESS: AccessRights = AccessRights {
    granted: false,
    restrict_to_accounts: Vec::new(),
};

impl AccessRights {
    #[must_use]
    pub const fn granted() -> Self {
        GRANTED_ACCESS
    }

    #[must_use]
    pub const fn denied() -> Self {
        DENIED_ACCESS
    }

    /// Whether these rights permit access to `account`.
    #[must_use]
    pub fn allows_account(&self, account: &str) -> bool {
        self.granted
            && (self.restrict_to_accounts.is_empty()
                || self.restrict_to_accounts.iter().any(|a| a == account))
    }
}

/// A key registered through the management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to_accounts: Option<Vec<String>>,
}

/// Operation arguments that may carry a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessArgs {
    #[serde(default)]
    pub access_key: Option<String>,
}

impl AccessArgs {
    /// Reads the credential from an untyped payload: the first non-empty
    /// string among [`ACCESS_KEY_FIELDS`]. Other fields and non-string
    /// values are ignored.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let access_key = ACCESS_KEY_FIELDS
            .iter()
            .filter_map(|name| payload.get(*name).and_then(Value::as_str))
            .find(|key| !key.is_empty())
            .map(str::to_string);
        Self { access_key }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            access_key: Some(key.into()),
        }
    }

    /// The supplied credential, treating an empty string as absent.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.access_key.as_deref().filter(|k| !k.is_empty())
    }
}
