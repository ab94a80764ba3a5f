//! API error handling: one mapping table from error kinds to HTTP statuses,
//! rendered through the response envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{Error, ErrorCode};

use super::response::Envelope;

/// Error body carried inside the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// An error ready to leave over HTTP.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.as_str().to_string(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.body.details = Some(details);
        self
    }
}

/// The one place error kinds become HTTP statuses.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Invalid { code, .. } => match code {
            ErrorCode::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InvalidFileFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        },
        Error::NotFound { .. } | Error::BlobMissing(_) => StatusCode::NOT_FOUND,
        Error::IllegalTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Internals are logged, not leaked.
            tracing::error!(error = %err, "request failed");
            return ApiError::new(status, err.code(), "internal error");
        }
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope: Envelope<()> = Envelope {
            status_code: self.status.as_u16(),
            data: None,
            error: Some(self.body),
        };
        (self.status, Json(envelope)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
