//! Error types for chatrelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Public body for [`Error::MissingInput`].
pub const MISSING_INPUT_MESSAGE: &str = "Provide either `messages` or `prompt`.";
/// Public body for [`Error::ApiKeyMissing`].
pub const API_KEY_MISSING_MESSAGE: &str = "OpenAI API key is not configured.";
/// Public body for [`Error::Auth`].
pub const AUTH_FAILURE_MESSAGE: &str = "Unable to authenticate with AI Gateway";
/// Public body for [`Error::UpstreamUnavailable`].
pub const UPSTREAM_UNAVAILABLE_MESSAGE: &str = "Unable to initiate model stream";
/// Replacement text for mid-stream failures when upstream detail is hidden.
pub const SANITIZED_STREAM_MESSAGE: &str = "The model stream was interrupted.";

/// Main error type for chatrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}", MISSING_INPUT_MESSAGE)]
    MissingInput,

    #[error("{}", API_KEY_MISSING_MESSAGE)]
    ApiKeyMissing,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Failure after the stream was committed. Displays the raw upstream text.
    #[error("{0}")]
    MidStream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to pick the HTTP status and the retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingInput,
    AuthFailure,
    UpstreamUnavailable,
    MidStreamFailure,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::UpstreamUnavailable)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingInput => ErrorKind::MissingInput,
            Error::ApiKeyMissing | Error::Auth(_) => ErrorKind::AuthFailure,
            Error::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Error::MidStream(_) => ErrorKind::MidStreamFailure,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::MissingInput => StatusCode::BAD_REQUEST,
            ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::AuthFailure | ErrorKind::MidStreamFailure | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the caller. Diagnostic detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::MissingInput => MISSING_INPUT_MESSAGE.to_string(),
            Error::ApiKeyMissing => API_KEY_MISSING_MESSAGE.to_string(),
            Error::Auth(_) => AUTH_FAILURE_MESSAGE.to_string(),
            Error::UpstreamUnavailable(_) => UPSTREAM_UNAVAILABLE_MESSAGE.to_string(),
            Error::MidStream(_) => SANITIZED_STREAM_MESSAGE.to_string(),
            Error::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.public_message() });
        (status, axum::Json(body)).into_response()
    }
}
