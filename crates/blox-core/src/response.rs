//! Response envelope returned by the gateway facade.
//!
//! The envelope is the externally visible contract:
//! `{"success": bool, "data": ... | null, "error": {...} | null}`.
//! Fields are private and the only constructors are [`GatewayResponse::success`]
//! and [`GatewayResponse::failure`], so exactly one of `data`/`error` is ever set.

use crate::error::GatewayError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized result of one gateway call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    success: bool,
    data: Option<Value>,
    error: Option<ErrorBody>,
}

/// Error details carried by a failed envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// HTTP status classification
    pub status: u16,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            status: err.status_code().as_u16(),
        }
    }
}

impl GatewayResponse {
    /// Successful envelope carrying the upstream payload
    ///
    /// A null payload (an empty upstream body) is carried as `{}` so a
    /// successful envelope always has non-null `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed envelope describing the error
    #[must_use]
    pub fn failure(err: &GatewayError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
        }
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Payload of a successful call
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Error details of a failed call
    #[must_use]
    pub fn error(&self) -> Option<&ErrorBody> {
        self.error.as_ref()
    }

    /// HTTP status mirroring the outcome
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.error
            .as_ref()
            .and_then(|e| StatusCode::from_u16(e.status).ok())
            .unwrap_or(StatusCode::OK)
    }

    /// Consume the envelope, returning the payload if successful
    #[must_use]
    pub fn into_data(self) -> Option<Value> {
        self.data
    }
}

impl From<Result<Value, GatewayError>> for GatewayResponse {
    fn from(result: Result<Value, GatewayError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ResourceCategory;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let response = GatewayResponse::success(json!({"id": 1, "name": "builderman"}));

        assert!(response.is_success());
        assert!(response.error().is_none());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.data().unwrap()["name"], "builderman");
    }

    #[test]
    fn test_null_payload_still_has_data() {
        let response = GatewayResponse::success(Value::Null);

        assert!(response.is_success());
        assert_eq!(response.data(), Some(&json!({})));

        let rendered = serde_json::to_value(&response).unwrap();
        assert_eq!(rendered["data"], json!({}));
        assert!(rendered["error"].is_null());
    }

    #[test]
    fn test_failure_envelope() {
        let err = GatewayError::rate_limited(ResourceCategory::Games, None);
        let response = GatewayResponse::failure(&err);

        assert!(!response.is_success());
        assert!(response.data().is_none());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = response.error().unwrap();
        assert_eq!(body.code, "rate_limit_exceeded");
        assert_eq!(body.status, 429);
    }

    #[test]
    fn test_serialization_has_explicit_nulls() {
        let ok = serde_json::to_value(GatewayResponse::success(json!([1, 2]))).unwrap();
        assert_eq!(ok, json!({"success": true, "data": [1, 2], "error": null}));

        let err = GatewayError::upstream_permanent("User not found", 404);
        let failed = serde_json::to_value(GatewayResponse::failure(&err)).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["data"], Value::Null);
        assert_eq!(failed["error"]["code"], "upstream_permanent_error");
        assert_eq!(failed["error"]["status"], 404);
    }

    #[test]
    fn test_from_result() {
        let response: GatewayResponse = Err(GatewayError::Cancelled).into();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
