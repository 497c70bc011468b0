//! OSB error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use hb_common::ErrorKind;

/// Error returned by an OSB endpoint
#[derive(Debug, Error)]
pub enum ApiError {
    /// The `X-Broker-API-Version` header is missing
    #[error("missing X-Broker-API-Version header")]
    MissingApiVersion,

    /// The request body or query could not be read
    #[error("{0}")]
    BadRequest(String),

    /// The platform must accept an asynchronous answer
    #[error("{0}")]
    AsyncRequired(String),

    /// The instance or operation does not exist
    #[error("{0}")]
    Gone(String),

    /// The request conflicts with what the broker already stored
    #[error("{0}")]
    Conflict(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl From<hb_common::Error> for ApiError {
    fn from(e: hb_common::Error) -> Self {
        let description = e.to_string();
        if e.is_async_required() {
            return ApiError::AsyncRequired(description);
        }
        match e.kind() {
            ErrorKind::NotFound => ApiError::Gone(description),
            ErrorKind::Conflict => ApiError::Conflict(description),
            ErrorKind::Invalid => ApiError::BadRequest(description),
            ErrorKind::Transient | ErrorKind::Fatal => ApiError::Internal(description),
        }
    }
}

impl ApiError {
    /// Bind failures other than broker outages are the caller's fault
    pub fn from_bind(e: hb_common::Error) -> Self {
        match e.kind() {
            ErrorKind::Transient | ErrorKind::Fatal => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::MissingApiVersion => (StatusCode::PRECONDITION_FAILED, "PreconditionFailed"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::AsyncRequired(_) => (StatusCode::UNPROCESSABLE_ENTITY, "AsyncRequired"),
            // OSB expects an empty object for a gone instance
            ApiError::Gone(_) => return (StatusCode::GONE, Json(json!({}))).into_response(),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = json!({
            "error": error,
            "description": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
