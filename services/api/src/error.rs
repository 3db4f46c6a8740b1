//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how core
//! errors surface as HTTP statuses.

use axum::http::StatusCode;
use mentorship_core::ports::PortError;
use tracing::{error, warn};

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

pub fn status_for(err: &PortError) -> StatusCode {
    match err {
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::TenantMismatch { .. } | PortError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Converts a core error into the `(StatusCode, String)` pair handlers return.
///
/// Server-side failures are logged in full and reported with a generic message.
pub fn to_response(err: PortError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(kind = err.kind(), error = %err, "request failed");
        let message = if err.is_retryable() {
            "A dependency is temporarily unavailable"
        } else {
            "An unexpected internal error occurred"
        };
        (status, message.to_string())
    } else {
        warn!(kind = err.kind(), error = %err, "request rejected");
        (status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_and_permission_errors_are_forbidden() {
        assert_eq!(
            status_for(&PortError::tenant_mismatch("goals", "g1", "org1")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&PortError::PermissionDenied("no".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&PortError::Transient("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (status, message) = to_response(PortError::Unexpected("codec: bad field".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("codec"));
    }
}
