//! JSON error envelope (spec §4.K, §6): `{error, error_code, timestamp}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use cliaimonitor_core::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    error_code: String,
    timestamp: chrono::DateTime<Utc>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            error_code: format!("ERR_{}", status.as_u16()),
            timestamp: Utc::now(),
            status,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

/// Maps core error kinds to HTTP status per spec §7: Validation/
/// Conflict → 4xx, Storage/Integrity/Unavailable → 5xx, NotFound → 404.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}
