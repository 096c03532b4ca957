//! API Error Handling
//!
//! This module defines the error types and conversions used by the
//! keyshare server API.
//!
//! [`ApiErrors`] represents the different kinds of API errors internally:
//! bad requests, unknown users, and internal server errors. Conversions
//! are provided from service-level errors like [`KeyshareServiceError`],
//! ensuring consistent HTTP responses.
//!
//! Core sentinels about JWTs, commitment sessions and issuer keys all
//! collapse into the same generic bad-request message, so an untrusted
//! caller cannot tell which check failed.
//!
//! All errors implement [`IntoResponse`] so they can be directly returned
//! from Axum handlers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use eyre::Report;
use keyshare_core::CoreError;
use uuid::Uuid;

use crate::services::keyshare::KeyshareServiceError;

/// Result type used by API endpoints.
pub(crate) type ApiResult<T> = Result<T, ApiErrors>;

/// Represents all possible API errors internally.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiErrors {
    #[error("user is not registered")]
    UserNotRegistered,
    #[error("Bad request: \"{0}\"")]
    BadRequest(String),
    #[error(transparent)]
    InternalServerError(#[from] eyre::Report),
}

impl From<KeyshareServiceError> for ApiErrors {
    fn from(value: KeyshareServiceError) -> Self {
        tracing::debug!("{value:?}");
        match value {
            KeyshareServiceError::UserNotRegistered => ApiErrors::UserNotRegistered,
            KeyshareServiceError::MissingCommitments => {
                ApiErrors::BadRequest("Missing previous call to getCommitments".to_string())
            }
            KeyshareServiceError::Core(core) => Self::from(core),
            KeyshareServiceError::InternalServerError(report) => {
                ApiErrors::InternalServerError(report)
            }
        }
    }
}

impl From<CoreError> for ApiErrors {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::PinTooLong => ApiErrors::BadRequest("pin exceeds maximum length".to_string()),
            CoreError::EmptyKeyList => ApiErrors::BadRequest("no keys specified".to_string()),
            // one generic code for all session-shaped failures
            CoreError::InvalidJwt | CoreError::InvalidCommit | CoreError::UntrustedKey(_) => {
                ApiErrors::BadRequest("invalid keyshare session".to_string())
            }
            other => ApiErrors::InternalServerError(Report::new(other)),
        }
    }
}

impl IntoResponse for ApiErrors {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiErrors::UserNotRegistered => {
                (StatusCode::FORBIDDEN, "USER_NOT_REGISTERED").into_response()
            }
            ApiErrors::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiErrors::InternalServerError(inner) => {
                handle_internal_server_error(inner).into_response()
            }
        }
    }
}

/// Handle internal server errors by logging and returning a generic message to clients.
///
/// Generates a unique error ID for tracking in logs.
fn handle_internal_server_error(err: Report) -> (StatusCode, String) {
    let error_id = Uuid::new_v4();
    tracing::error!("{error_id} - {err:?}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("An internal server error has occurred. Error ID={error_id}"),
    )
}
