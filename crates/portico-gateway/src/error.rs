use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portico_core::PorticoError;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

/// A [`PorticoError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub PorticoError);

/// Result type returned by every handler.
pub type ApiResult<T> = Result<T, ApiError>;

impl From<PorticoError> for ApiError {
    fn from(e: PorticoError) -> Self {
        Self(e)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PorticoError::Validation(_) => StatusCode::BAD_REQUEST,
            PorticoError::NotFound(_) => StatusCode::NOT_FOUND,
            PorticoError::Conflict(_) => StatusCode::CONFLICT,
            PorticoError::Discovery(_) | PorticoError::Deployment(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if status == StatusCode::BAD_GATEWAY {
                warn!(status = status.as_u16(), error = %self.0, "Upstream failure");
            } else {
                error!(status = status.as_u16(), error = %self.0, "Request failed");
            }
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

/// Decodes a JSON request body; malformed input is a client error.
pub fn parse_body<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body)
        .map_err(|e| ApiError(PorticoError::Validation(format!("Invalid request body: {e}"))))
}
