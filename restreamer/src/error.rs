//! Request error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Cut(#[from] cutting::CutError),

    #[error(transparent)]
    Segments(#[from] segments::SegmentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Cut(error) if error.is_request_error() => {
                (StatusCode::BAD_REQUEST, error.to_string())
            }
            ApiError::Cut(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
            ApiError::Segments(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        };
        if status.is_server_error() {
            warn!(%status, message, "Request failed");
        }
        (status, message).into_response()
    }
}
