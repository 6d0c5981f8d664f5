//! Execution backends for sandboxed runs.
//!
//! A backend receives a prepared workspace and runs its entry script under a
//! wall-clock limit. The Docker backend is the isolating one; the process
//! backend runs the script directly on the host and exists for development
//! machines without a daemon.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ExecutorError;

#[derive(Debug, Clone)]
pub struct ExecutionJob {
    /// Unique name for the run, used as the container name.
    pub name: String,
    /// Host directory holding the entry script and source.
    pub workspace: PathBuf,
    /// Entry script file name inside `workspace`.
    pub entry_script: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// `None` when the run was killed before it exited.
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub duration: Duration,
    /// Output of the entry script itself, outside the program's redirects.
    pub logs: String,
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    /// One-off setup before the first run, such as pulling an image.
    async fn prepare(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn execute(&self, job: &ExecutionJob) -> Result<ExecutionOutcome, ExecutorError>;
}

pub mod docker;
pub mod process;

pub use docker::DockerCodeExecutor;
pub use process::ProcessExecutor;
