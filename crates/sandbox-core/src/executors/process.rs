//! Host-process backend.
//!
//! Runs the entry script with `sh` directly on the host. There is no
//! isolation and no resource limit beyond the timeout, so this backend is
//! only meant for local development and tests.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::{CodeExecutor, ExecutionJob, ExecutionOutcome};
use crate::errors::ExecutorError;

pub struct ProcessExecutor {
    shell: String,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.shell)
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn execute(&self, job: &ExecutionJob) -> Result<ExecutionOutcome, ExecutorError> {
        let started = Instant::now();
        let mut command = Command::new(&self.shell);
        command
            .arg(job.workspace.join(&job.entry_script))
            .current_dir(&job.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so the program and anything it forks can be
        // killed together.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let group = ProcessGroup(child.id());

        // Dropping the future on timeout drops the child, which kills the
        // shell; the guard takes down the rest of the group.
        match tokio::time::timeout(job.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
                logs.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(ExecutionOutcome {
                    exit_code: output.status.code().map(i64::from),
                    timed_out: false,
                    duration: started.elapsed(),
                    logs,
                })
            }
            Err(_) => {
                log::warn!("Execution timed out after {:?} for {}", job.timeout, job.name);
                drop(group);
                Ok(ExecutionOutcome {
                    exit_code: None,
                    timed_out: true,
                    duration: started.elapsed(),
                    logs: String::new(),
                })
            }
        }
    }
}

/// Kills a whole process group when dropped. Processes the entry script left
/// behind after a normal exit are killed as well.
struct ProcessGroup(Option<u32>);

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0 {
            let result = std::process::Command::new("kill")
                .arg("-KILL")
                .arg("--")
                .arg(format!("-{}", pgid))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = result {
                log::warn!("Failed to kill process group {}: {}", pgid, e);
            }
        }
    }
}
