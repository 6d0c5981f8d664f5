//! Configuration type definitions for the sandbox service
//!
//! Every section is optional in YAML. A missing section falls back to its
//! `Default`, so an empty file (or no file at all) yields a usable setup that
//! talks to the local Docker daemon and runs the built-in languages.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compilers::LanguageCompiler;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SandboxConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub docker: DockerSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub limits: ExecutionLimits,
    #[serde(default)]
    pub languages: Vec<LanguageCompiler>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSection {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_true")]
    pub pull_missing: bool,
    /// `user[:group]` the container process runs as; image default when unset.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Per-container resource caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_true")]
    pub network_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Leave workspaces on disk after execution, for debugging.
    #[serde(default)]
    pub keep: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "sandbox-runtime:latest".to_string()
}

fn default_mount_path() -> String {
    "/sandbox".to_string()
}

fn default_memory_mb() -> u64 {
    256
}

fn default_cpus() -> f64 {
    1.0
}

fn default_pids_limit() -> i64 {
    64
}

pub(crate) fn default_workspace_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sandbox")
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_timeout_secs() -> u64 {
    60
}

fn default_max_source_bytes() -> usize {
    64 * 1024
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_concurrent: default_max_concurrent(),
            max_body_size: default_max_body_size(),
            enable_cors: true,
        }
    }
}

impl Default for DockerSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            mount_path: default_mount_path(),
            pull_missing: true,
            user: None,
            limits: ResourceLimits::default(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            network_disabled: true,
        }
    }
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            keep: false,
        }
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_source_bytes: default_max_source_bytes(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
