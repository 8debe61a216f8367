//! Application error type.
//!
//! Every failure the query-session core can produce is one of these kinds.
//! None of them is fatal: the session controller turns them into status
//! text and the HTTP adapter turns them into an error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by the query-session core.
#[derive(Debug, Error)]
pub enum AppError {
    /// Client construction or connect failure.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Database or container listing failure.
    #[error("catalog listing failed: {0}")]
    Catalog(String),

    /// Malformed or failing document query.
    #[error("query failed: {0}")]
    Query(String),

    /// Fetch superseded or explicitly cancelled.
    #[error("The operation was cancelled.")]
    Cancelled,

    /// Client requested after the factory was disposed.
    #[error("client factory has been disposed")]
    Disposed,

    /// Input failed validation (e.g. malformed connection string).
    #[error("validation error: {0}")]
    Validation(String),

    /// Command invoked while disabled or already running.
    #[error("command '{0}' is not available")]
    CommandDisabled(&'static str),

    /// Connection store read or write failure.
    #[error("connection store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Catalog(_) => "CATALOG_ERROR",
            AppError::Query(_) => "QUERY_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::Disposed => "DISPOSED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::CommandDisabled(_) => "COMMAND_DISABLED",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error crosses the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Connection(_) | AppError::Catalog(_) => StatusCode::BAD_GATEWAY,
            AppError::Query(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Cancelled | AppError::CommandDisabled(_) => StatusCode::CONFLICT,
            AppError::Disposed => StatusCode::GONE,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is the expected outcome of a superseded or cancelled fetch.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Store(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_conflict() {
        let err = AppError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CANCELLED");
    }

    #[test]
    fn test_disposed_maps_to_gone() {
        assert_eq!(AppError::Disposed.status_code(), StatusCode::GONE);
        assert!(!AppError::Disposed.is_cancelled());
    }

    #[test]
    fn test_io_error_becomes_store_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AppError = io.into();
        assert_eq!(err.code(), "STORE_ERROR");
    }
}
