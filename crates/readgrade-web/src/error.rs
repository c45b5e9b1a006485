//! Error responses for the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use readgrade_core::CoreError;

/// Body returned with every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body failed validation (422)
    #[error("{0}")]
    Validation(String),

    /// Unknown request id (404)
    #[error("No progress found for request {0}")]
    NotFound(String),

    /// A batch with the same request id is still running (409)
    #[error("Request {0} is already being processed")]
    Conflict(String),

    /// The batch overran its deadline (504)
    #[error("{0}")]
    DeadlineExceeded(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::DeadlineExceeded(_) => "deadline_exceeded",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("API error ({}): {}", status.as_u16(), self);
        } else {
            log::warn!("API error ({}): {}", status.as_u16(), self);
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RequestInProgress { request_id } => ApiError::Conflict(request_id),
            e @ CoreError::DeadlineExceeded { .. } => ApiError::DeadlineExceeded(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}
