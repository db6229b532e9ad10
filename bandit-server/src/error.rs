//! Server error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bandit_core::{ErrorKind, ServingError};
use thiserror::Error;

/// Errors that can occur starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Serving setup failed
    #[error(transparent)]
    Serving(#[from] ServingError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Serving(e) => e.exit_code(),
            Self::Bind { .. } | Self::Internal(_) => ErrorKind::Platform.exit_code(),
        }
    }
}

/// A failed request, rendered with the status its kind maps to
#[derive(Debug)]
pub struct ApiError(pub ServingError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Customer => StatusCode::BAD_REQUEST,
            ErrorKind::ProcessDown => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Platform | ErrorKind::Algorithm => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<ServingError>> From<E> for ApiError {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error".to_string(),
            _ => self.0.public_message(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use bandit_core::error::{CodecError, ScorerError};

    use super::*;

    #[test]
    fn customer_errors_are_bad_request() {
        let error = ApiError::from(CodecError::Malformed("eof".to_string()));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn process_down_is_service_unavailable() {
        let error = ApiError::from(ScorerError::ProcessDown { code: None });
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn algorithm_errors_are_internal() {
        let error = ApiError(ServingError::Algorithm("boom".to_string()));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn exit_code_follows_kind() {
        let error = ServerError::from(ServingError::Customer("bad".to_string()));
        assert_eq!(error.exit_code(), 1);
        let bind = ServerError::Bind {
            addr: "0.0.0.0:1".to_string(),
            source: std::io::Error::other("in use"),
        };
        assert_eq!(bind.exit_code(), 3);
    }
}
