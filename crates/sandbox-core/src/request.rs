//! Request and response types exchanged with sandbox callers.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxTestResult {
    /// The test has not executed yet, or the run never got far enough to
    /// produce output worth comparing.
    #[default]
    NotRan,
    /// The run finished but did not produce the expected output.
    Failed,
    /// The run finished and the output matched.
    Passed,
}

/// A stdin/expected-stdout pair checked against one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxTest {
    /// Caller-side id, echoed back so the report can be matched up.
    pub id: String,
    /// Lines fed to the program's standard input.
    #[serde(default)]
    pub stdin_data: Vec<String>,
    /// Lines the program is expected to print. When absent the test passes
    /// on any clean exit.
    #[serde(default)]
    pub expected_stdout_data: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// Optional caller id; a fresh UUID is used when missing.
    #[serde(default)]
    pub id: Option<String>,
    pub language: String,
    /// Program text. Also accepted as a list of lines.
    #[serde(deserialize_with = "deserialize_source")]
    pub source_code: String,
    /// Wall-clock limit in seconds; the configured default when missing.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub test: Option<SandboxTest>,
}

impl SandboxRequest {
    pub fn new(language: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            id: None,
            language: language.into(),
            source_code: source_code.into(),
            timeout: None,
            test: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_test(mut self, test: SandboxTest) -> Self {
        self.test = Some(test);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceInput {
    Text(String),
    Lines(Vec<String>),
}

fn deserialize_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SourceInput::deserialize(deserializer)? {
        SourceInput::Text(text) => text,
        SourceInput::Lines(lines) => lines.join("\n"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    CompileError,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub id: String,
    pub result: SandboxTestResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<String>>,
    pub actual: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResponse {
    pub id: String,
    pub language: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
    /// Set when any captured stream hit the output cap.
    #[serde(default)]
    pub truncated: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestReport>,
}

/// Line-wise comparison ignoring trailing whitespace and trailing blank lines.
pub fn compare_output<E: AsRef<str>>(expected: &[E], actual: &str) -> bool {
    let expected = normalize(expected.iter().map(|line| line.as_ref()));
    let actual = normalize(actual.lines());
    expected == actual
}

/// Split captured stdout into lines the way `compare_output` sees them.
pub fn output_lines(output: &str) -> Vec<String> {
    normalize(output.lines())
}

fn normalize<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut normalized: Vec<String> = lines.map(|line| line.trim_end().to_string()).collect();
    while normalized.last().is_some_and(|line| line.is_empty()) {
        normalized.pop();
    }
    normalized
}
