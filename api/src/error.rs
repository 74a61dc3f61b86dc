use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spacebridge_core::error::{self, ApiError};

/// Failures surfaced as the shared JSON error body.
#[derive(Debug)]
pub enum AppError {
    /// Malformed input (400)
    Validation {
        message: String,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { message: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation { message, docs_hint } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message,
                    request_id,
                    docs_hint: Some(
                        "Open a new stream on /v1/sse and use the endpoint it announces."
                            .to_string(),
                    ),
                },
            ),
        };

        (status, Json(api_error)).into_response()
    }
}
