//! API error type
//!
//! | variant    | status | origin                                        |
//! |------------|--------|-----------------------------------------------|
//! | BadRequest | 400    | missing field, disallowed kind, no week start |
//! | NotFound   | 404    | unknown agent                                 |
//! | Internal   | 500    | extraction failure, storage failure           |
//!
//! Notification failures never reach this type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::SubmissionError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),

    /// cuentakm-common error
    #[error("Common error: {0}")]
    Common(#[from] cuentakm_common::Error),
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Validation(msg) | SubmissionError::Prerequisite(msg) => {
                ApiError::BadRequest(msg)
            }
            SubmissionError::NotFound(msg) => ApiError::NotFound(msg),
            e @ SubmissionError::Extraction(_) => ApiError::Internal(e.to_string()),
            SubmissionError::Storage(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                tracing::error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ExtractionError;

    fn status_of(err: SubmissionError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_submission_errors_map_to_statuses() {
        assert_eq!(status_of(SubmissionError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(SubmissionError::Prerequisite("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(SubmissionError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SubmissionError::Extraction(ExtractionError::EmptyAnswer)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SubmissionError::Storage(cuentakm_common::Error::Internal("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_extraction_message_is_kept() {
        let err = ApiError::from(SubmissionError::Extraction(ExtractionError::NoDigits("abc".into())));
        assert!(err.to_string().starts_with("Error leyendo kilómetros"));
    }
}
