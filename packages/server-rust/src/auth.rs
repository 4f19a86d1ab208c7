//! Authorization client.
//!
//! Resolves opaque access keys into [`AccessRights`] through a remote
//! JSON-RPC service and manages keys through its administrative methods.
//! Without a configured endpoint the server runs open: every credential is
//! granted and administrative calls fail fast.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use qserver_core::error::DEFAULT_ERROR_SOURCE;
use qserver_core::{create_error, AccessKey, AccessRights, QError, QLog};

use crate::config::AuthorizationConfig;
use crate::context::carrier::TransportCarrier;

#[derive(Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

impl From<JsonRpcError> for QError {
    fn from(err: JsonRpcError) -> Self {
        let message = err
            .message
            .filter(|m| !m.is_empty())
            .or(err.description)
            .unwrap_or_default();
        let source = err
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_SOURCE.to_string());
        create_error(err.code.filter(|c| *c != 0).unwrap_or(500), message, &source)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessKeysParams<'a, K: Serialize> {
    account: &'a str,
    keys: K,
    signed_management_access_key: &'a str,
}

/// Maps an HTTP client failure onto a `system`-typed transport fault.
#[must_use]
pub fn transport_error(err: &reqwest::Error) -> QError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_decode() {
        "decode"
    } else {
        "request"
    };
    QError::system(format!("Auth service {kind} failure: {err}"))
}

/// Client of the remote authorization service.
#[derive(Debug, Clone)]
pub struct Auth {
    config: AuthorizationConfig,
    client: reqwest::Client,
    log: QLog,
}

impl Auth {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: AuthorizationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            config,
            client,
            log: QLog::new("auth"),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// No endpoint configured: every credential is granted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.config.endpoint.is_empty()
    }

    #[must_use]
    pub fn unauthorized_error() -> QError {
        QError::unauthorized()
    }

    /// Credential presented by the transport, header or handshake.
    #[must_use]
    pub fn extract_access_key(carrier: &TransportCarrier) -> Option<String> {
        carrier.access_key()
    }

    /// # Errors
    ///
    /// [`QError::auth_service_unavailable`] when no endpoint is configured.
    pub fn auth_service_required(&self) -> Result<(), QError> {
        if self.is_open() {
            return Err(QError::auth_service_unavailable());
        }
        Ok(())
    }

    /// Resolves `access_key` and requires it to be granted.
    ///
    /// # Errors
    ///
    /// [`QError::unauthorized`] when access is denied, or the remote failure.
    pub async fn require_granted_access(
        &self,
        access_key: Option<&str>,
    ) -> Result<AccessRights, QError> {
        let rights = self.get_access_rights(access_key).await?;
        if !rights.granted {
            return Err(Self::unauthorized_error());
        }
        Ok(rights)
    }

    /// Resolves `access_key` into access rights.
    ///
    /// # Errors
    ///
    /// Returns the remote failure.
    pub async fn get_access_rights(&self, access_key: Option<&str>) -> Result<AccessRights, QError> {
        if self.is_open() {
            return Ok(AccessRights::granted());
        }
        let access_key = access_key.unwrap_or_default();
        if access_key.is_empty() {
            return Ok(AccessRights::denied());
        }
        // A missing restrictToAccounts deserializes to an empty list.
        self.invoke_auth("getAccessRights", json!({ "accessKey": access_key }))
            .await
    }

    /// # Errors
    ///
    /// [`QError::auth_service_unavailable`] without an endpoint, or the remote failure.
    pub async fn get_management_access_key(&self) -> Result<String, QError> {
        self.auth_service_required()?;
        self.invoke_auth("getManagementAccessKey", json!({})).await
    }

    /// Registers `keys` for `account`; returns the number registered.
    ///
    /// # Errors
    ///
    /// [`QError::auth_service_unavailable`] without an endpoint, or the remote failure.
    pub async fn register_access_keys(
        &self,
        account: &str,
        keys: &[AccessKey],
        signed_management_access_key: &str,
    ) -> Result<u64, QError> {
        self.auth_service_required()?;
        self.invoke_auth(
            "registerAccessKeys",
            AccessKeysParams {
                account,
                keys,
                signed_management_access_key,
            },
        )
        .await
    }

    /// Revokes `keys` of `account`; returns the number revoked.
    ///
    /// # Errors
    ///
    /// [`QError::auth_service_unavailable`] without an endpoint, or the remote failure.
    pub async fn revoke_access_keys(
        &self,
        account: &str,
        keys: &[String],
        signed_management_access_key: &str,
    ) -> Result<u64, QError> {
        self.auth_service_required()?;
        self.invoke_auth(
            "revokeAccessKeys",
            AccessKeysParams {
                account,
                keys,
                signed_management_access_key,
            },
        )
        .await
    }

    /// Whether `access_key` belongs to the management allow-set.
    #[must_use]
    pub fn is_mam_access_key(&self, access_key: &str) -> bool {
        let candidate = access_key.as_bytes();
        self.config
            .mam_access_keys
            .iter()
            .fold(false, |found, key| found | bool::from(key.as_bytes().ct_eq(candidate)))
    }

    /// Calls `method` on the authorization service.
    ///
    /// # Errors
    ///
    /// A `system`-typed error on transport failure, "Auth service failed"
    /// for a non-200 status, or the JSON-RPC error object of the response.
    pub async fn invoke_auth<P, R>(&self, method: &str, params: P) -> Result<R, QError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "1",
            method,
            params,
        };
        let response = self
            .client
            .post(self.config.endpoint.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        if status != reqwest::StatusCode::OK {
            self.log.debug(
                "AUTH_FAILED",
                &json!({ "method": method, "status": status.as_u16() }),
            );
            return Err(QError::new(500, format!("Auth service failed: {body}")));
        }

        let envelope: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| QError::system(format!("Auth service returned invalid JSON: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
            QError::new(500, format!("Auth service returned unexpected result: {e}"))
        })
    }
}
