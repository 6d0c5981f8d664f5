// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::Instant;

use super::{CodeExecutor, ExecutionJob, ExecutionOutcome};
use crate::config::DockerSection;
use crate::errors::ExecutorError;

const NANO_CPUS_PER_CPU: f64 = 1_000_000_000.0;

/// Extra seconds the in-container kill timer allows past the job timeout,
/// so the host-side timer normally fires first.
const CONTAINER_TIMEOUT_GRACE_SECS: u64 = 2;

pub struct DockerCodeExecutor {
    docker: Docker,
    settings: DockerSection,
}

impl DockerCodeExecutor {
    pub fn new(settings: DockerSection) -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, settings })
    }

    pub fn image(&self) -> &str {
        &self.settings.image
    }

    /// Make sure the runtime image is present locally, pulling it if allowed.
    pub async fn ensure_image(&self) -> Result<(), ExecutorError> {
        if self.docker.inspect_image(&self.settings.image).await.is_ok() {
            return Ok(());
        }
        if !self.settings.pull_missing {
            return Err(ExecutorError::ImageUnavailable(self.settings.image.clone()));
        }

        log::info!("Pulling runtime image {}", self.settings.image);
        let pull_options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(self.settings.image.clone()),
            ..Default::default()
        });
        let mut pull_stream = self.docker.create_image(pull_options, None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => log::debug!("Pulling image: {:?}", info.status),
                Err(e) => {
                    log::error!("Failed to pull image {}: {}", self.settings.image, e);
                    return Err(ExecutorError::ImageUnavailable(self.settings.image.clone()));
                }
            }
        }
        Ok(())
    }

    async fn collect_logs(&self, container_id: &str) -> String {
        let mut output_stream = self.docker.logs(
            container_id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut logs = String::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    logs.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Failed to read logs for {}: {}", container_id, e);
                    break;
                }
            }
        }
        logs
    }

    async fn remove(&self, container_id: &str) {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            ..Default::default()
        });
        if let Err(e) = self.docker.remove_container(container_id, options).await {
            log::warn!("Failed to remove container {}: {}", container_id, e);
        }
    }
}

#[async_trait]
impl CodeExecutor for DockerCodeExecutor {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn prepare(&self) -> Result<(), ExecutorError> {
        self.ensure_image().await
    }

    async fn execute(&self, job: &ExecutionJob) -> Result<ExecutionOutcome, ExecutorError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(job.name.clone()),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, container_body(&self.settings, job))
            .await?;
        log::debug!("Created container {} for {}", container.id, job.name);

        let started = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await
        {
            self.remove(&container.id).await;
            return Err(e.into());
        }

        let mut wait_stream = self
            .docker
            .wait_container(&container.id, None::<BollardWaitContainerOptionsQuery>);
        let timeout_future = tokio::time::sleep(job.timeout);

        let wait_outcome = tokio::select! {
            res = wait_stream.next() => Some(res),
            _ = timeout_future => None,
        };
        let duration = started.elapsed();

        let exit_code = match wait_outcome {
            None => {
                log::warn!(
                    "Execution timed out after {:?} for container {}",
                    job.timeout,
                    container.id
                );
                self.remove(&container.id).await;
                return Ok(ExecutionOutcome {
                    exit_code: None,
                    timed_out: true,
                    duration,
                    logs: String::new(),
                });
            }
            Some(Some(Ok(response))) => response.status_code,
            // bollard reports a non-zero exit status as a wait error
            Some(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => code,
            Some(Some(Err(e))) => {
                self.remove(&container.id).await;
                return Err(e.into());
            }
            Some(None) => {
                self.remove(&container.id).await;
                return Err(ExecutorError::WaitInterrupted(container.id));
            }
        };

        let logs = self.collect_logs(&container.id).await;
        self.remove(&container.id).await;
        log::debug!(
            "Container {} exited with {} in {:?}",
            container.id,
            exit_code,
            duration
        );

        Ok(ExecutionOutcome {
            exit_code: Some(exit_code),
            timed_out: false,
            duration,
            logs,
        })
    }
}

/// Container definition for one run: workspace bind mount, resource caps,
/// no network and no capabilities.
fn container_body(settings: &DockerSection, job: &ExecutionJob) -> ContainerCreateBody {
    let mount_path = settings.mount_path.trim_end_matches('/');
    let limits = &settings.limits;
    let memory_bytes = limits
        .memory_mb
        .checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .unwrap_or(i64::MAX);
    // Bounds the run even if nobody on the host is left to remove the container.
    let kill_after = job.timeout.as_secs().max(1) + CONTAINER_TIMEOUT_GRACE_SECS;

    let host_config = HostConfig {
        binds: Some(vec![format!(
            "{}:{}",
            job.workspace.display(),
            mount_path
        )]),
        memory: Some(memory_bytes),
        // equal to memory: no swap on top
        memory_swap: Some(memory_bytes),
        nano_cpus: Some((limits.cpus * NANO_CPUS_PER_CPU) as i64),
        pids_limit: Some(limits.pids_limit),
        network_mode: limits.network_disabled.then(|| "none".to_string()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(settings.image.clone()),
        cmd: Some(vec![
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            kill_after.to_string(),
            "sh".to_string(),
            format!("{}/{}", mount_path, job.entry_script),
        ]),
        working_dir: Some(mount_path.to_string()),
        user: settings.user.clone(),
        network_disabled: Some(limits.network_disabled),
        host_config: Some(host_config),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use std::path::PathBuf;
    use std::time::Duration;

    fn job() -> ExecutionJob {
        ExecutionJob {
            name: "sandbox-test".to_string(),
            workspace: PathBuf::from("/tmp/sandbox/test"),
            entry_script: "entry.sh".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn container_body_applies_limits_and_mount() {
        let settings = DockerSection {
            image: "runtime:test".to_string(),
            mount_path: "/sandbox/".to_string(),
            pull_missing: false,
            user: Some("1000:1000".to_string()),
            limits: ResourceLimits {
                memory_mb: 128,
                cpus: 0.5,
                pids_limit: 32,
                network_disabled: true,
            },
        };
        let body = container_body(&settings, &job());

        assert_eq!(body.image.as_deref(), Some("runtime:test"));
        assert_eq!(body.working_dir.as_deref(), Some("/sandbox"));
        assert_eq!(body.user.as_deref(), Some("1000:1000"));
        // job timeout 5s plus grace, enforced inside the container
        assert_eq!(
            body.cmd,
            Some(
                ["timeout", "-s", "KILL", "7", "sh", "/sandbox/entry.sh"]
                    .iter()
                    .map(|part| part.to_string())
                    .collect()
            )
        );

        let host = body.host_config.unwrap();
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/sandbox/test:/sandbox".to_string()])
        );
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(32));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
    }

    #[test]
    fn oversized_memory_limit_saturates() {
        let mut settings = DockerSection::default();
        settings.limits.memory_mb = u64::MAX;
        let host = container_body(&settings, &job()).host_config.unwrap();
        assert_eq!(host.memory, Some(i64::MAX));
        assert_eq!(host.memory_swap, Some(i64::MAX));
    }

    #[tokio::test]
    #[ignore] // Requires a Docker daemon and the runtime image
    async fn runs_entry_script_in_container() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("entry.sh"), "echo hi > out.txt\n").unwrap();
        let executor = DockerCodeExecutor::new(DockerSection {
            image: "alpine:latest".to_string(),
            ..Default::default()
        })
        .unwrap();
        executor.ensure_image().await.unwrap();

        let outcome = executor
            .execute(&ExecutionJob {
                name: format!("sandbox-test-{}", uuid::Uuid::new_v4()),
                workspace: root.path().to_path_buf(),
                entry_script: "entry.sh".to_string(),
                timeout: Duration::from_secs(30),
            })
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(
            std::fs::read_to_string(root.path().join("out.txt")).unwrap(),
            "hi\n"
        );
    }
}
