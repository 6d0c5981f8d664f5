//! Request validation, concurrency control and the full execution pipeline.

use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::compilers::{CompilerRegistry, LanguageCompiler};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;
use crate::executors::CodeExecutor;
use crate::request::{SandboxRequest, SandboxResponse};
use crate::sandbox::Sandbox;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid id pattern"))
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub executor: String,
    pub executor_available: bool,
    pub available_permits: usize,
    pub max_concurrent: usize,
}

#[derive(Clone)]
pub struct SandboxService {
    config: Arc<SandboxConfig>,
    registry: Arc<CompilerRegistry>,
    executor: Arc<dyn CodeExecutor>,
    permits: Arc<Semaphore>,
}

impl SandboxService {
    pub fn new(config: SandboxConfig, executor: Arc<dyn CodeExecutor>) -> Self {
        let registry = CompilerRegistry::new(&config.languages);
        let permits = Arc::new(Semaphore::new(config.server.max_concurrent));
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            executor,
            permits,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn executor(&self) -> &dyn CodeExecutor {
        self.executor.as_ref()
    }

    pub fn languages(&self) -> Vec<&LanguageCompiler> {
        self.registry.languages()
    }

    pub async fn health(&self) -> ServiceHealth {
        ServiceHealth {
            executor: self.executor.name().to_string(),
            executor_available: self.executor.is_available().await,
            available_permits: self.permits.available_permits(),
            max_concurrent: self.config.server.max_concurrent,
        }
    }

    /// Check a request against the configured limits and resolve its
    /// language. Returns the sandbox id and the effective timeout.
    pub fn validate(
        &self,
        request: &SandboxRequest,
    ) -> Result<(String, Duration, &LanguageCompiler), SandboxError> {
        let limits = &self.config.limits;

        let id = match &request.id {
            Some(id) if !id_pattern().is_match(id) => {
                return Err(SandboxError::InvalidRequest(format!(
                    "id '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                    id
                )))
            }
            Some(id) => id.clone(),
            None => Uuid::new_v4().to_string(),
        };

        if request.source_code.trim().is_empty() {
            return Err(SandboxError::InvalidRequest(
                "source_code cannot be empty".to_string(),
            ));
        }
        if request.source_code.len() > limits.max_source_bytes {
            return Err(SandboxError::InvalidRequest(format!(
                "source_code is {} bytes, limit is {}",
                request.source_code.len(),
                limits.max_source_bytes
            )));
        }

        let timeout = request.timeout.unwrap_or(limits.default_timeout_secs);
        if timeout == 0 || timeout > limits.max_timeout_secs {
            return Err(SandboxError::InvalidRequest(format!(
                "timeout must be between 1 and {} seconds, got {}",
                limits.max_timeout_secs, timeout
            )));
        }

        if let Some(test) = &request.test {
            if test.id.trim().is_empty() {
                return Err(SandboxError::InvalidRequest(
                    "test id cannot be empty".to_string(),
                ));
            }
        }

        let compiler = self.registry.resolve(&request.language)?;
        Ok((id, Duration::from_secs(timeout), compiler))
    }

    /// Validate, wait for a free slot, then prepare, run, evaluate and
    /// clean up one sandbox.
    ///
    /// The pipeline runs on its own task. Dropping the returned future (a
    /// client disconnecting, for instance) does not cut the run short: the
    /// timeout, container removal and workspace cleanup still happen, and
    /// the slot stays taken until they have.
    pub async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let (id, timeout, compiler) = self.validate(&request)?;
        let compiler = compiler.clone();

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SandboxError::WorkspaceError(format!("Execution slots closed: {}", e)))?;

        let mut sandbox = Sandbox::new(id, request, compiler, timeout, &self.config);
        let executor = Arc::clone(&self.executor);
        let task = tokio::spawn(async move {
            let result = drive(&mut sandbox, executor.as_ref()).await;
            if let Err(e) = sandbox.cleanup().await {
                log::warn!("Cleanup failed for sandbox {}: {}", sandbox.id(), e);
            }
            drop(permit);
            result
        });

        task.await
            .map_err(|e| SandboxError::TaskFailed(e.to_string()))?
    }
}

async fn drive(
    sandbox: &mut Sandbox,
    executor: &dyn CodeExecutor,
) -> Result<SandboxResponse, SandboxError> {
    sandbox.prepare().await?;
    let outcome = sandbox.run(executor).await?;
    sandbox.evaluate(&outcome).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ProcessExecutor;
    use crate::request::SandboxTest;

    fn service() -> SandboxService {
        SandboxService::new(SandboxConfig::default(), Arc::new(ProcessExecutor::new()))
    }

    #[test]
    fn generates_id_and_default_timeout() {
        let service = service();
        let request = SandboxRequest::new("python", "print(1)");
        let (id, timeout, compiler) = service.validate(&request).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(timeout, Duration::from_secs(20));
        assert_eq!(compiler.language, "python");
    }

    #[test]
    fn rejects_path_like_ids() {
        let service = service();
        for id in ["../etc", "a/b", "", "with space"] {
            let request = SandboxRequest::new("python", "print(1)").with_id(id);
            assert!(
                matches!(service.validate(&request), Err(SandboxError::InvalidRequest(_))),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn rejects_out_of_range_timeouts_and_empty_source() {
        let service = service();
        let zero = SandboxRequest::new("python", "print(1)").with_timeout(0);
        let long = SandboxRequest::new("python", "print(1)").with_timeout(61);
        let empty = SandboxRequest::new("python", "  \n");
        for request in [zero, long, empty] {
            assert!(matches!(
                service.validate(&request),
                Err(SandboxError::InvalidRequest(_))
            ));
        }
        let max = SandboxRequest::new("python", "print(1)").with_timeout(60);
        assert!(service.validate(&max).is_ok());
    }

    #[test]
    fn rejects_oversized_source_and_blank_test_id() {
        let mut config = SandboxConfig::default();
        config.limits.max_source_bytes = 8;
        let service = SandboxService::new(config, Arc::new(ProcessExecutor::new()));
        let big = SandboxRequest::new("python", "print('too long')");
        assert!(matches!(
            service.validate(&big),
            Err(SandboxError::InvalidRequest(_))
        ));

        let blank_test = SandboxRequest::new("python", "1").with_test(SandboxTest {
            id: " ".to_string(),
            stdin_data: vec![],
            expected_stdout_data: None,
        });
        assert!(service.validate(&blank_test).is_err());
    }

    #[test]
    fn unsupported_language_is_a_client_error() {
        let err = service()
            .validate(&SandboxRequest::new("brainfuck", "+"))
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
