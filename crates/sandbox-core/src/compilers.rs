//! Language registry and entry-script rendering.
//!
//! A `LanguageCompiler` describes how one language runs inside the runtime
//! image: where the source goes, an optional build step, the run step and
//! the file its stdout lands in. The registry starts from the toolchains the
//! image installs (python, node, rust, mysql) and lets configuration replace
//! or extend them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::SandboxError;

/// Substituted with the source file name in `compile` and `run`.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

pub const ENTRY_SCRIPT: &str = "entry.sh";
pub const STDIN_FILE: &str = "input.in";
pub const STDERR_FILE: &str = "error.out";
pub const COMPILE_LOG_FILE: &str = "compile.out";
pub const COMPILE_FAILED_MARKER: &str = "compile.failed";

/// File names the entry script owns; a language may not reuse them.
pub const RESERVED_FILES: [&str; 5] = [
    ENTRY_SCRIPT,
    STDIN_FILE,
    STDERR_FILE,
    COMPILE_LOG_FILE,
    COMPILE_FAILED_MARKER,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCompiler {
    /// Canonical language name, e.g. `python`.
    pub language: String,
    /// Other names accepted for this language in requests.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Entry binary inside the image, e.g. `python3`.
    pub compiler: String,
    /// File the submitted source is written to inside the workspace.
    pub source_file: String,
    /// File the program's stdout is redirected to, read back after the run.
    pub output_file: String,
    /// Optional build step run before `run`.
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
}

impl LanguageCompiler {
    pub fn matches(&self, name: &str) -> bool {
        self.language.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }

    pub fn compile_command(&self) -> Option<String> {
        self.compile
            .as_ref()
            .map(|step| step.replace(SOURCE_PLACEHOLDER, &self.source_file))
    }

    pub fn run_command(&self) -> String {
        self.run.replace(SOURCE_PLACEHOLDER, &self.source_file)
    }

    /// Render the POSIX shell script the container executes.
    ///
    /// The script changes into its own directory, so it works both when the
    /// workspace is mounted into a container and when it runs on the host.
    pub fn entry_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\ncd \"$(dirname \"$0\")\" || exit 1\n");
        if let Some(compile) = self.compile_command() {
            script.push_str(&format!(
                "{{ {}; }} > {} 2>&1 || {{ : > {}; exit 1; }}\n",
                compile, COMPILE_LOG_FILE, COMPILE_FAILED_MARKER
            ));
        }
        script.push_str(&format!(
            "{{ {}; }} < {} > {} 2> {}\n",
            self.run_command(),
            STDIN_FILE,
            self.output_file,
            STDERR_FILE
        ));
        script
    }
}

/// The toolchains installed by the runtime image.
pub fn builtin_compilers() -> Vec<LanguageCompiler> {
    vec![
        LanguageCompiler {
            language: "python".to_string(),
            aliases: vec!["python3".to_string(), "py".to_string()],
            compiler: "python3".to_string(),
            source_file: "main.py".to_string(),
            output_file: "python.out".to_string(),
            compile: None,
            run: "python3 {source}".to_string(),
        },
        LanguageCompiler {
            language: "node".to_string(),
            aliases: vec![
                "javascript".to_string(),
                "js".to_string(),
                "nodejs".to_string(),
            ],
            compiler: "node".to_string(),
            source_file: "main.js".to_string(),
            output_file: "node.out".to_string(),
            compile: None,
            run: "node {source}".to_string(),
        },
        LanguageCompiler {
            language: "rust".to_string(),
            aliases: vec!["rs".to_string()],
            compiler: "rustc".to_string(),
            source_file: "main.rs".to_string(),
            output_file: "rust.out".to_string(),
            compile: Some("rustc -O -o main {source}".to_string()),
            run: "./main".to_string(),
        },
        LanguageCompiler {
            language: "mysql".to_string(),
            aliases: vec!["sql".to_string()],
            compiler: "mysql".to_string(),
            source_file: "main.sql".to_string(),
            output_file: "mysql.out".to_string(),
            compile: None,
            // helper shipped in the runtime image; starts a private mysqld first
            run: "sandbox-mysql {source}".to_string(),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct CompilerRegistry {
    compilers: BTreeMap<String, LanguageCompiler>,
}

impl CompilerRegistry {
    /// Built-ins, with `overrides` replacing entries of the same language.
    pub fn new(overrides: &[LanguageCompiler]) -> Self {
        let mut compilers = BTreeMap::new();
        for compiler in builtin_compilers().into_iter().chain(overrides.iter().cloned()) {
            compilers.insert(compiler.language.to_lowercase(), compiler);
        }
        Self { compilers }
    }

    pub fn resolve(&self, name: &str) -> Result<&LanguageCompiler, SandboxError> {
        let name = name.trim();
        if let Some(compiler) = self.compilers.get(&name.to_lowercase()) {
            return Ok(compiler);
        }
        self.compilers
            .values()
            .find(|compiler| compiler.matches(name))
            .ok_or_else(|| SandboxError::UnsupportedLanguage(name.to_string()))
    }

    pub fn languages(&self) -> Vec<&LanguageCompiler> {
        self.compilers.values().collect()
    }
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        Self::new(&[])
    }
}
