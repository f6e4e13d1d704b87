//! Error taxonomy for the portal service
//!
//! Expected rejections (bad credentials, pending approval, stale
//! tokens) and true faults (database unreachable, aborted sequence
//! transaction) live in one enum but map to distinct HTTP status
//! classes, so callers can tell a "wait" state from a failure.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Custom error type for the portal service
#[derive(Error, Debug)]
pub enum PortalError {
    /// Password did not match the stored credential
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No account matches the given email or id
    #[error("account not found")]
    NotFound,

    /// Account exists but has not been approved by an administrator
    #[error("account is pending approval")]
    PendingApproval,

    /// Session or refresh token is missing, malformed, or expired
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// Approval was requested for an already-approved account
    #[error("account is already approved")]
    AlreadyApproved,

    /// Registration or restore collided with an existing email
    #[error("email is already registered")]
    EmailTaken,

    /// Caller lacks the administrator flag
    #[error("administrator access required")]
    Forbidden,

    /// Login throttle triggered for this email
    #[error("too many attempts")]
    TooManyAttempts,

    /// Request payload failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Membership sequence transaction aborted
    #[error("failed to generate membership number: {0}")]
    SequenceGeneration(#[source] sqlx::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for portal results
pub type PortalResult<T> = Result<T, PortalError>;

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PortalError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            PortalError::NotFound => (StatusCode::NOT_FOUND, "Account not found".to_string()),
            PortalError::PendingApproval => (
                StatusCode::FORBIDDEN,
                "Your account is pending approval. Please contact the administrator.".to_string(),
            ),
            PortalError::InvalidOrExpiredToken => {
                (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
            }
            PortalError::AlreadyApproved => (
                StatusCode::BAD_REQUEST,
                "Account is already approved".to_string(),
            ),
            PortalError::EmailTaken => (
                StatusCode::BAD_REQUEST,
                "Email is already registered".to_string(),
            ),
            PortalError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Administrator access required".to_string(),
            ),
            PortalError::TooManyAttempts => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many login attempts, please try again later".to_string(),
            ),
            PortalError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            PortalError::SequenceGeneration(err) => {
                error!("Membership sequence generation failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate membership number".to_string(),
                )
            }
            PortalError::Database(err) => {
                error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            PortalError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_rejections_map_to_client_status_classes() {
        assert_eq!(
            PortalError::InvalidCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PortalError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PortalError::PendingApproval.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PortalError::InvalidOrExpiredToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PortalError::AlreadyApproved.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn pending_approval_is_distinct_from_invalid_credentials() {
        let pending = PortalError::PendingApproval.into_response().status();
        let invalid = PortalError::InvalidCredentials.into_response().status();
        assert_ne!(pending, invalid);
    }

    #[test]
    fn faults_map_to_server_errors() {
        assert_eq!(
            PortalError::Internal("boom".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PortalError::SequenceGeneration(sqlx::Error::PoolClosed)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
