//! Configuration loader for YAML files and environment overrides
//!
//! Loading is parse, then environment overrides, then validation.

use crate::config::types::*;
use crate::errors::SandboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_BIND_ADDR: &str = "SANDBOX_BIND_ADDR";
pub const ENV_IMAGE: &str = "SANDBOX_IMAGE";
pub const ENV_WORKSPACE_ROOT: &str = "SANDBOX_WORKSPACE_ROOT";
pub const ENV_LOG_LEVEL: &str = "SANDBOX_LOG_LEVEL";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub async fn from_file_or_default<P: AsRef<Path>>(
        path: P,
    ) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::from_file(path).await
        } else {
            log::debug!(
                "Config file {} not found, using defaults",
                path.display()
            );
            let mut config = SandboxConfig::default();
            Self::apply_env_overrides(&mut config);
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        let mut config: SandboxConfig = if content.trim().is_empty() {
            SandboxConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                SandboxError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(config: &mut SandboxConfig) {
        if let Some(addr) = non_empty_var(ENV_BIND_ADDR) {
            log::debug!("{} overrides server.bind_addr", ENV_BIND_ADDR);
            config.server.bind_addr = addr;
        }
        if let Some(image) = non_empty_var(ENV_IMAGE) {
            log::debug!("{} overrides docker.image", ENV_IMAGE);
            config.docker.image = image;
        }
        if let Some(root) = non_empty_var(ENV_WORKSPACE_ROOT) {
            log::debug!("{} overrides workspace.root", ENV_WORKSPACE_ROOT);
            config.workspace.root = PathBuf::from(root);
        }
        if let Some(level) = non_empty_var(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
