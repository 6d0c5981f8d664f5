//! Error types for sandbox preparation, execution and configuration
//!
//! Failures are split by where they originate. `SandboxError` is what callers
//! of the service see; `ExecutorError` covers the container/process backends.
//! A program that exits non-zero or runs past its timeout is not an error at
//! this level, it is reported through the response status instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Sandbox is in state {current} but {operation} requires {expected}")]
    InvalidState {
        operation: &'static str,
        current: &'static str,
        expected: &'static str,
    },
    #[error("Workspace error: {0}")]
    WorkspaceError(String),
    #[error("Sandbox id '{0}' is already in use")]
    WorkspaceInUse(String),
    #[error("Execution task failed: {0}")]
    TaskFailed(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Executor error: {0}")]
    ExecutorError(#[from] ExecutorError),
}

impl SandboxError {
    /// Errors caused by the caller's input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidRequest(_)
                | SandboxError::UnsupportedLanguage(_)
                | SandboxError::WorkspaceInUse(_)
        )
    }
}

// Specific error for the execution backends
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("I/O error during execution: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Runtime image '{0}' is not available")]
    ImageUnavailable(String),
    #[error("Executor '{0}' is not available")]
    Unavailable(String),
    #[error("Container wait stream ended unexpectedly for {0}")]
    WaitInterrupted(String),
}
