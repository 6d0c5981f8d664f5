//! Core library for running untrusted, user-submitted code in throwaway
//! containers.
//!
//! # Architecture Overview
//!
//! - **Configuration**: YAML with environment overrides and validation
//! - **Compilers**: registry of languages the runtime image can build and run
//! - **Workspace**: per-request host directory mounted into the container
//! - **Sandbox**: prepare / run / evaluate / cleanup lifecycle of one request
//! - **Executors**: Docker backend with resource limits, plus a host-process
//!   backend for development
//! - **Service**: validation, concurrency limits and the end-to-end pipeline

pub mod compilers;
pub mod config;
pub mod errors;
pub mod executors;
pub mod request;
pub mod sandbox;
pub mod service;
pub mod workspace;

pub use compilers::{CompilerRegistry, LanguageCompiler};
pub use config::{ConfigLoader, SandboxConfig};
pub use errors::{ExecutorError, SandboxError};
pub use executors::{CodeExecutor, DockerCodeExecutor, ExecutionJob, ExecutionOutcome, ProcessExecutor};
pub use request::{
    ExecutionStatus, SandboxRequest, SandboxResponse, SandboxTest, SandboxTestResult, TestReport,
};
pub use sandbox::{Sandbox, SandboxState};
pub use service::{SandboxService, ServiceHealth};
