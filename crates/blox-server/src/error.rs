//! API response rendering.
//!
//! Every endpoint answers with the gateway envelope
//! `{"success", "data", "error"}`; the HTTP status mirrors the error
//! classification.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blox_core::{GatewayError, GatewayResponse};
use serde::Serialize;
use tracing::{debug, error};

/// Envelope returned by API handlers
#[derive(Debug)]
pub struct ApiResponse(pub GatewayResponse);

impl ApiResponse {
    /// Successful envelope around any serializable value
    ///
    /// # Errors
    /// Returns an internal error if the value cannot be serialized
    pub fn ok<T: Serialize>(data: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(data)
            .map_err(|e| GatewayError::internal(format!("Failed to serialize response: {e}")))?;
        Ok(Self(GatewayResponse::success(value)))
    }

    /// HTTP status of the envelope
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }
}

impl From<GatewayResponse> for ApiResponse {
    fn from(response: GatewayResponse) -> Self {
        Self(response)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0)).into_response()
    }
}

/// Error raised before a request reaches the gateway
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl ApiError {
    /// Bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(GatewayError::invalid_request(message))
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self(GatewayError::internal(message))
    }

    /// HTTP status of the error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.0.status_code()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, error = %self.0, "API error response");
        } else {
            debug!(status = %status, error = %self.0, "API error response");
        }

        ApiResponse(GatewayResponse::failure(&self.0)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON parse error: {err}"))
    }
}
