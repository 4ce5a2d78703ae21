//! API error types and response formatting.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid request (malformed body, failed validation, over-limit batch).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The ingestion queue could not accept the batch in time.
    #[error("queue saturated")]
    QueueSaturated,

    /// The server is shutting down and no longer accepts events.
    #[error("shutting down")]
    ShuttingDown,

    /// Dedup store error.
    #[error("store error: {0}")]
    Store(#[from] granary_ingest::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<granary_core::Error> for ApiError {
    fn from(e: granary_core::Error) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<granary_ingest::QueueError> for ApiError {
    fn from(e: granary_ingest::QueueError) -> Self {
        match e {
            granary_ingest::QueueError::Saturated => Self::QueueSaturated,
            granary_ingest::QueueError::Closed => Self::ShuttingDown,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                Some(msg.clone()),
            ),
            Self::QueueSaturated => (
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_saturated",
                Some("event queue is full, retry later".to_string()),
            ),
            Self::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                Some("server is shutting down".to_string()),
            ),
            Self::Store(err) => {
                tracing::error!(error = %err, "store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    Some("A storage error occurred".to_string()),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_maps_to_400() {
        let response = ApiError::BadRequest("missing topic".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_queue_saturated_maps_to_503() {
        let response = ApiError::QueueSaturated.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validation_error_converts_to_bad_request() {
        let err = granary_core::Error::InvalidBatch("too big".to_string());
        assert!(matches!(ApiError::from(err), ApiError::BadRequest(_)));
    }

    #[test]
    fn test_queue_errors_convert() {
        assert!(matches!(
            ApiError::from(granary_ingest::QueueError::Saturated),
            ApiError::QueueSaturated
        ));
        assert!(matches!(
            ApiError::from(granary_ingest::QueueError::Closed),
            ApiError::ShuttingDown
        ));
    }
}
