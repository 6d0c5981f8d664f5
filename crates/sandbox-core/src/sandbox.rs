//! Lifecycle of one sandboxed execution.
//!
//! A `Sandbox` moves through `Created -> Prepared -> Finished -> CleanedUp`.
//! `prepare` lays out the workspace, `run` hands it to an executor,
//! `evaluate` reads back what the program left behind and `cleanup` removes
//! the workspace. Each step checks the state it expects, so calling them out
//! of order is an error instead of a silent misuse of the filesystem.

use std::time::Duration;
use uuid::Uuid;

use crate::compilers::{
    LanguageCompiler, COMPILE_FAILED_MARKER, COMPILE_LOG_FILE, ENTRY_SCRIPT, STDERR_FILE,
    STDIN_FILE,
};
use crate::config::{ExecutionLimits, SandboxConfig, WorkspaceSection};
use crate::errors::SandboxError;
use crate::executors::{CodeExecutor, ExecutionJob, ExecutionOutcome};
use crate::request::{
    compare_output, output_lines, ExecutionStatus, SandboxRequest, SandboxResponse,
    SandboxTestResult, TestReport,
};
use crate::workspace::{CapturedText, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Prepared,
    Finished,
    CleanedUp,
}

impl SandboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxState::Created => "created",
            SandboxState::Prepared => "prepared",
            SandboxState::Finished => "finished",
            SandboxState::CleanedUp => "cleaned_up",
        }
    }
}

pub struct Sandbox {
    id: String,
    request: SandboxRequest,
    compiler: LanguageCompiler,
    timeout: Duration,
    limits: ExecutionLimits,
    workspace_settings: WorkspaceSection,
    workspace: Option<Workspace>,
    state: SandboxState,
}

impl Sandbox {
    /// Creates a sandbox for an already validated request. Nothing touches
    /// the filesystem until `prepare`.
    pub fn new(
        id: impl Into<String>,
        request: SandboxRequest,
        compiler: LanguageCompiler,
        timeout: Duration,
        config: &SandboxConfig,
    ) -> Self {
        Self {
            id: id.into(),
            request,
            compiler,
            timeout,
            limits: config.limits.clone(),
            workspace_settings: config.workspace.clone(),
            workspace: None,
            state: SandboxState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Create the workspace and write the source, stdin and entry script.
    pub async fn prepare(&mut self) -> Result<(), SandboxError> {
        self.expect_state("prepare", SandboxState::Created)?;

        let workspace = Workspace::create(
            &self.workspace_settings.root,
            &self.id,
            self.workspace_settings.keep,
        )
        .await?;

        let mut source = self.request.source_code.clone();
        if !source.ends_with('\n') {
            source.push('\n');
        }
        workspace
            .write_file(&self.compiler.source_file, source.as_bytes())
            .await?;

        let stdin = match &self.request.test {
            Some(test) if !test.stdin_data.is_empty() => {
                let mut data = test.stdin_data.join("\n");
                data.push('\n');
                data
            }
            _ => String::new(),
        };
        workspace.write_file(STDIN_FILE, stdin.as_bytes()).await?;
        workspace
            .write_file(ENTRY_SCRIPT, self.compiler.entry_script().as_bytes())
            .await?;

        log::debug!(
            "Prepared sandbox {} for {} in {}",
            self.id,
            self.compiler.language,
            workspace.path().display()
        );
        self.workspace = Some(workspace);
        self.state = SandboxState::Prepared;
        Ok(())
    }

    pub async fn run(
        &mut self,
        executor: &dyn CodeExecutor,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.expect_state("run", SandboxState::Prepared)?;
        let workspace = self.prepared_workspace("run")?;

        let job = ExecutionJob {
            name: format!("sandbox-{}-{}", self.id, Uuid::new_v4().simple()),
            workspace: workspace.path().to_path_buf(),
            entry_script: ENTRY_SCRIPT.to_string(),
            timeout: self.timeout,
        };

        log::info!(
            "Running sandbox {} ({}) on {} with timeout {:?}",
            self.id,
            self.compiler.language,
            executor.name(),
            self.timeout
        );
        let outcome = executor.execute(&job).await?;
        self.state = SandboxState::Finished;
        Ok(outcome)
    }

    /// Read the captured streams and turn the outcome into a response.
    pub async fn evaluate(
        &self,
        outcome: &ExecutionOutcome,
    ) -> Result<SandboxResponse, SandboxError> {
        self.expect_state("evaluate", SandboxState::Finished)?;
        let workspace = self.prepared_workspace("evaluate")?;
        let max = self.limits.max_output_bytes;

        let stdout = workspace
            .read_capped(&self.compiler.output_file, max)
            .await?
            .unwrap_or_default();
        let stderr = match workspace.read_capped(STDERR_FILE, max).await? {
            Some(captured) => captured,
            None => CapturedText::capped(outcome.logs.as_bytes(), max),
        };
        let compile_output = if self.compiler.compile.is_some() {
            workspace.read_capped(COMPILE_LOG_FILE, max).await?
        } else {
            None
        };
        let compile_failed = workspace.contains(COMPILE_FAILED_MARKER).await;

        let status = if outcome.timed_out {
            ExecutionStatus::TimedOut
        } else if compile_failed {
            ExecutionStatus::CompileError
        } else if outcome.exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::RuntimeError
        };

        let test = self.request.test.as_ref().map(|test| {
            let result = match status {
                ExecutionStatus::CompileError => SandboxTestResult::NotRan,
                ExecutionStatus::TimedOut | ExecutionStatus::RuntimeError => {
                    SandboxTestResult::Failed
                }
                ExecutionStatus::Success => match &test.expected_stdout_data {
                    Some(expected) if !compare_output(expected, &stdout.text) => {
                        SandboxTestResult::Failed
                    }
                    _ => SandboxTestResult::Passed,
                },
            };
            TestReport {
                id: test.id.clone(),
                result,
                expected: test.expected_stdout_data.clone(),
                actual: output_lines(&stdout.text),
            }
        });

        let truncated = stdout.truncated
            || stderr.truncated
            || compile_output.as_ref().is_some_and(|c| c.truncated);

        log::info!(
            "Sandbox {} finished with {:?} (exit {:?}) in {:?}",
            self.id,
            status,
            outcome.exit_code,
            outcome.duration
        );

        Ok(SandboxResponse {
            id: self.id.clone(),
            language: self.compiler.language.clone(),
            status,
            exit_code: outcome.exit_code,
            stdout: stdout.text,
            stderr: stderr.text,
            compile_output: compile_output.map(|c| c.text),
            truncated,
            duration_ms: outcome.duration.as_millis() as u64,
            test,
        })
    }

    /// Remove the workspace. Safe to call in any state.
    pub async fn cleanup(&mut self) -> Result<(), SandboxError> {
        if let Some(workspace) = self.workspace.as_mut() {
            workspace.cleanup().await?;
        }
        self.state = SandboxState::CleanedUp;
        Ok(())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: SandboxState,
    ) -> Result<(), SandboxError> {
        if self.state != expected {
            return Err(SandboxError::InvalidState {
                operation,
                current: self.state.as_str(),
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    fn prepared_workspace(&self, operation: &'static str) -> Result<&Workspace, SandboxError> {
        self.workspace.as_ref().ok_or(SandboxError::InvalidState {
            operation,
            current: self.state.as_str(),
            expected: SandboxState::Prepared.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilers::CompilerRegistry;
    use crate::errors::ExecutorError;
    use crate::request::SandboxTest;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Writes canned files into the workspace instead of running anything.
    struct ScriptedExecutor {
        files: Vec<(&'static str, &'static str)>,
        outcome: ExecutionOutcome,
        seen: Mutex<Vec<ExecutionJob>>,
    }

    impl ScriptedExecutor {
        fn new(files: Vec<(&'static str, &'static str)>, exit_code: Option<i64>) -> Self {
            Self {
                files,
                outcome: ExecutionOutcome {
                    exit_code,
                    timed_out: exit_code.is_none(),
                    duration: Duration::from_millis(12),
                    logs: String::new(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodeExecutor for ScriptedExecutor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn execute(&self, job: &ExecutionJob) -> Result<ExecutionOutcome, ExecutorError> {
            for (name, contents) in &self.files {
                std::fs::write(job.workspace.join(name), contents)?;
            }
            self.seen.lock().unwrap().push(job.clone());
            Ok(self.outcome.clone())
        }
    }

    fn config_for(root: &Path) -> SandboxConfig {
        let mut config = SandboxConfig::default();
        config.workspace.root = root.to_path_buf();
        config
    }

    fn sandbox(root: &Path, language: &str, request: SandboxRequest) -> Sandbox {
        let compiler = CompilerRegistry::default().resolve(language).unwrap().clone();
        Sandbox::new(
            "job",
            request,
            compiler,
            Duration::from_secs(5),
            &config_for(root),
        )
    }

    #[tokio::test]
    async fn prepare_writes_workspace_files() {
        let root = tempdir().unwrap();
        let request = SandboxRequest::new("python", "print(input())").with_test(SandboxTest {
            id: "t".to_string(),
            stdin_data: vec!["a".to_string(), "b".to_string()],
            expected_stdout_data: None,
        });
        let mut sandbox = sandbox(root.path(), "python", request);
        sandbox.prepare().await.unwrap();
        assert_eq!(sandbox.state(), SandboxState::Prepared);

        let dir = root.path().join("job");
        assert_eq!(
            std::fs::read_to_string(dir.join("main.py")).unwrap(),
            "print(input())\n"
        );
        assert_eq!(std::fs::read_to_string(dir.join(STDIN_FILE)).unwrap(), "a\nb\n");
        assert!(std::fs::read_to_string(dir.join(ENTRY_SCRIPT))
            .unwrap()
            .contains("python3 main.py"));

        sandbox.cleanup().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn run_before_prepare_is_rejected() {
        let root = tempdir().unwrap();
        let mut sandbox = sandbox(root.path(), "python", SandboxRequest::new("python", "1"));
        let executor = ScriptedExecutor::new(vec![], Some(0));
        match sandbox.run(&executor).await {
            Err(SandboxError::InvalidState { operation, current, .. }) => {
                assert_eq!(operation, "run");
                assert_eq!(current, "created");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn passing_test_case() {
        let root = tempdir().unwrap();
        let request = SandboxRequest::new("python", "print('hello')").with_test(SandboxTest {
            id: "greeting".to_string(),
            stdin_data: vec![],
            expected_stdout_data: Some(vec!["hello".to_string()]),
        });
        let mut sandbox = sandbox(root.path(), "python", request);
        sandbox.prepare().await.unwrap();

        let executor = ScriptedExecutor::new(vec![("python.out", "hello\n")], Some(0));
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();

        assert_eq!(response.status, ExecutionStatus::Success);
        assert_eq!(response.stdout, "hello\n");
        assert_eq!(response.duration_ms, 12);
        let report = response.test.unwrap();
        assert_eq!(report.result, SandboxTestResult::Passed);
        assert_eq!(report.actual, vec!["hello".to_string()]);

        let jobs = executor.seen.lock().unwrap();
        assert!(jobs[0].name.starts_with("sandbox-job-"));
        assert_eq!(jobs[0].entry_script, ENTRY_SCRIPT);
    }

    #[tokio::test]
    async fn mismatched_output_fails_test() {
        let root = tempdir().unwrap();
        let request = SandboxRequest::new("node", "console.log(2)").with_test(SandboxTest {
            id: "t".to_string(),
            stdin_data: vec![],
            expected_stdout_data: Some(vec!["3".to_string()]),
        });
        let mut sandbox = sandbox(root.path(), "node", request);
        sandbox.prepare().await.unwrap();
        let executor = ScriptedExecutor::new(vec![("node.out", "2\n")], Some(0));
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();
        assert_eq!(response.status, ExecutionStatus::Success);
        assert_eq!(response.test.unwrap().result, SandboxTestResult::Failed);
    }

    #[tokio::test]
    async fn compile_failure_leaves_test_not_ran() {
        let root = tempdir().unwrap();
        let request = SandboxRequest::new("rust", "fn main() {").with_test(SandboxTest {
            id: "t".to_string(),
            stdin_data: vec![],
            expected_stdout_data: Some(vec!["x".to_string()]),
        });
        let mut sandbox = sandbox(root.path(), "rust", request);
        sandbox.prepare().await.unwrap();
        let executor = ScriptedExecutor::new(
            vec![
                (COMPILE_LOG_FILE, "error: this file contains an unclosed delimiter\n"),
                (COMPILE_FAILED_MARKER, ""),
            ],
            Some(1),
        );
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();
        assert_eq!(response.status, ExecutionStatus::CompileError);
        assert!(response
            .compile_output
            .unwrap()
            .contains("unclosed delimiter"));
        assert_eq!(response.test.unwrap().result, SandboxTestResult::NotRan);
    }

    #[tokio::test]
    async fn timeout_fails_test() {
        let root = tempdir().unwrap();
        let request = SandboxRequest::new("python", "while True: pass").with_test(SandboxTest {
            id: "t".to_string(),
            stdin_data: vec![],
            expected_stdout_data: None,
        });
        let mut sandbox = sandbox(root.path(), "python", request);
        sandbox.prepare().await.unwrap();
        let executor = ScriptedExecutor::new(vec![], None);
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();
        assert_eq!(response.status, ExecutionStatus::TimedOut);
        assert_eq!(response.exit_code, None);
        assert_eq!(response.test.unwrap().result, SandboxTestResult::Failed);
    }

    #[tokio::test]
    async fn runtime_error_and_output_cap() {
        let root = tempdir().unwrap();
        let mut config = config_for(root.path());
        config.limits.max_output_bytes = 4;
        let compiler = CompilerRegistry::default().resolve("python").unwrap().clone();
        let mut sandbox = Sandbox::new(
            "capped",
            SandboxRequest::new("python", "raise SystemExit(2)"),
            compiler,
            Duration::from_secs(5),
            &config,
        );
        sandbox.prepare().await.unwrap();
        let executor = ScriptedExecutor::new(
            vec![("python.out", "0123456789"), (STDERR_FILE, "boom")],
            Some(2),
        );
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();
        assert_eq!(response.status, ExecutionStatus::RuntimeError);
        assert_eq!(response.exit_code, Some(2));
        assert_eq!(response.stdout, "0123");
        assert_eq!(response.stderr, "boom");
        assert!(response.truncated);
        assert!(response.test.is_none());
        assert!(response.compile_output.is_none());
    }

    #[tokio::test]
    async fn stderr_fallback_is_capped_by_bytes() {
        let root = tempdir().unwrap();
        let mut config = config_for(root.path());
        config.limits.max_output_bytes = 5;
        let compiler = CompilerRegistry::default().resolve("python").unwrap().clone();
        let mut sandbox = Sandbox::new(
            "logs",
            SandboxRequest::new("python", "print(1)"),
            compiler,
            Duration::from_secs(5),
            &config,
        );
        sandbox.prepare().await.unwrap();
        let mut executor = ScriptedExecutor::new(vec![("python.out", "1\n")], Some(1));
        executor.outcome.logs = "ééé".to_string();
        let outcome = sandbox.run(&executor).await.unwrap();
        let response = sandbox.evaluate(&outcome).await.unwrap();

        assert_eq!(response.stderr, "éé");
        assert!(response.truncated);
    }
}
