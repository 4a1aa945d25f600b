//! HTTP request and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ServiceError;

/// Query string of `GET /generate_music`.
///
/// Every field is taken as text so that malformed values reach validation
/// and get the service's own error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateQuery {
    pub prompt: Option<String>,
    pub duration: Option<String>,
    pub seed: Option<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` after a failed model load.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Model loader state.
    pub model_state: String,
    /// Version of the loaded weights, once ready.
    pub model_version: Option<String>,
    /// Most recent model load failure.
    pub last_error: Option<String>,
    /// Background preload status.
    pub preload: String,
    /// Jobs waiting for a worker.
    pub queue_pending: usize,
}

/// Error details in an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub hint: String,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                hint: err.code.recovery_hint().to_string(),
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.code.is_validation() {
            info!(code = %self.code, message = %self.message, "rejected request");
        } else {
            error!(code = %self.code, error = %self, "request failed");
        }

        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
