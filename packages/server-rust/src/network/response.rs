//! Protocol-level error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use qserver_core::QError;

/// A [`QError`] rendered as an HTTP error response.
///
/// The body follows the GraphQL error envelope:
/// `{ "errors": [{ "message", "extensions": { "code", "source" } }] }`.
#[derive(Debug)]
pub struct ErrorResponse(pub QError);

impl From<QError> for ErrorResponse {
    fn from(error: QError) -> Self {
        Self(error)
    }
}

impl ErrorResponse {
    /// The error code when it is an HTTP error status, otherwise 500.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        u16::try_from(self.0.code)
            .ok()
            .filter(|code| (400..=599).contains(code))
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "errors": [{
                "message": self.0.message,
                "extensions": {
                    "code": self.0.code,
                    "source": self.0.origin,
                },
            }],
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    async fn body_of(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_keeps_its_status() {
        let response = ErrorResponse::from(QError::unauthorized()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_of(response).await;
        assert_eq!(body["errors"][0]["message"], "Unauthorized");
        assert_eq!(body["errors"][0]["extensions"]["code"], 401);
        assert_eq!(body["errors"][0]["extensions"]["source"], "graphql");
    }

    #[tokio::test]
    async fn remote_codes_map_to_internal_error() {
        let error = QError::new(-32_000, "remote failure").with_source("auth");
        let response = ErrorResponse(error).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], -32_000);
        assert_eq!(body["errors"][0]["extensions"]["source"], "auth");
    }

    #[test]
    fn informational_codes_are_not_statuses() {
        assert_eq!(
            ErrorResponse(QError::new(200, "odd")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorResponse(QError::multiple_access_keys()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
