use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use meridian_chain::ChainError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors a handler turns into an HTTP response.
///
/// Recoverable input errors become 4xx with a plain-text body; everything
/// else is an internal failure surfaced as 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input: 400 with the message as body.
    #[error("{0}")]
    BadRequest(String),
    /// Disallowed input: 403.
    #[error("{0}")]
    Forbidden(String),
    /// Unexpected failure: 500, logged.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Wraps an error with a field context, the way handlers annotate which
    /// input failed: `"revision: kvstore: not found"`.
    pub fn bad_request(context: &str, err: impl std::fmt::Display) -> Self {
        Self::BadRequest(format!("{context}: {err}"))
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<meridian_state::StateError> for ApiError {
    fn from(err: meridian_state::StateError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            Self::Internal(message) => {
                tracing::error!(target: "api", %message, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, format!("{message}\n")).into_response()
    }
}
