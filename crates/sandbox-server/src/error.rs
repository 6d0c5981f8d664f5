//! Error types for the sandbox server.

use axum::http::StatusCode;
use sandbox_core::{ExecutorError, SandboxError};
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the sandbox server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failure reported by the sandbox service
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a new configuration error.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status the error maps to when returned from a handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Sandbox(e) => status_for(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HTTP status for a failure reported by the sandbox service.
pub fn status_for(error: &SandboxError) -> StatusCode {
    match error {
        SandboxError::WorkspaceInUse(_) => StatusCode::CONFLICT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        SandboxError::ExecutorError(
            ExecutorError::Unavailable(_) | ExecutorError::ImageUnavailable(_),
        ) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_status_codes() {
        let bad = ServerError::from(SandboxError::UnsupportedLanguage("cobol".into()));
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

        let down = ServerError::from(SandboxError::ExecutorError(ExecutorError::Unavailable(
            "docker".into(),
        )));
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let taken = ServerError::from(SandboxError::WorkspaceInUse("job-1".into()));
        assert_eq!(taken.status_code(), StatusCode::CONFLICT);

        let io = ServerError::from(SandboxError::WorkspaceError("disk full".into()));
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
