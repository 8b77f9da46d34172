//! Error types for the relay and its administrative surface

use axum::{Json, http::StatusCode, response::IntoResponse};

use super::protocol::ApiError;

/// Faults raised by relay operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to encode notice: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "Room control operation failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::internal(self.to_string())),
        )
            .into_response()
    }
}

/// Delivery failure for a single outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection's writer is gone
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full
    #[error("outbound queue full")]
    Full,
    /// The outbound queue stayed full past the send timeout
    #[error("send timed out")]
    Timeout,
}
