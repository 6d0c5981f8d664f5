//! Sanity checks run after a configuration is loaded.

use crate::compilers::{RESERVED_FILES, SOURCE_PLACEHOLDER};
use crate::config::types::SandboxConfig;
use crate::errors::SandboxError;
use std::collections::HashSet;
use std::net::SocketAddr;

/// 1 TiB; keeps the byte conversion for the container well inside `i64`.
pub const MAX_MEMORY_MB: u64 = 1 << 20;

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        self.server
            .bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| {
                SandboxError::ConfigError(format!(
                    "Invalid server.bind_addr '{}': {}",
                    self.server.bind_addr, e
                ))
            })?;

        if self.server.max_concurrent == 0 {
            return Err(config_error("server.max_concurrent must be at least 1"));
        }

        if self.docker.image.trim().is_empty() {
            return Err(config_error("docker.image cannot be empty"));
        }
        if !self.docker.mount_path.starts_with('/') {
            return Err(SandboxError::ConfigError(format!(
                "docker.mount_path must be absolute, got '{}'",
                self.docker.mount_path
            )));
        }
        if self.docker.limits.memory_mb == 0 || self.docker.limits.memory_mb > MAX_MEMORY_MB {
            return Err(SandboxError::ConfigError(format!(
                "docker.limits.memory_mb must be between 1 and {}, got {}",
                MAX_MEMORY_MB, self.docker.limits.memory_mb
            )));
        }
        // docker reads 0 and negative values as "no limit"
        if self.docker.limits.pids_limit <= 0 {
            return Err(SandboxError::ConfigError(format!(
                "docker.limits.pids_limit must be positive, got {}",
                self.docker.limits.pids_limit
            )));
        }
        if !(self.docker.limits.cpus > 0.0) {
            return Err(config_error("docker.limits.cpus must be positive"));
        }

        let limits = &self.limits;
        if limits.max_timeout_secs == 0 || limits.default_timeout_secs == 0 {
            return Err(config_error("timeouts must be at least one second"));
        }
        if limits.default_timeout_secs > limits.max_timeout_secs {
            return Err(SandboxError::ConfigError(format!(
                "limits.default_timeout_secs ({}) exceeds limits.max_timeout_secs ({})",
                limits.default_timeout_secs, limits.max_timeout_secs
            )));
        }
        if limits.max_source_bytes == 0 || limits.max_output_bytes == 0 {
            return Err(config_error("byte limits must be positive"));
        }

        self.logging
            .level
            .parse::<log::LevelFilter>()
            .map_err(|_| {
                SandboxError::ConfigError(format!(
                    "Invalid logging.level '{}', expected one of off, error, warn, info, debug, trace",
                    self.logging.level
                ))
            })?;

        let mut seen = HashSet::new();
        for language in &self.languages {
            let name = language.language.to_lowercase();
            if name.trim().is_empty() {
                return Err(config_error("language entries need a name"));
            }
            if !seen.insert(name.clone()) {
                return Err(SandboxError::ConfigError(format!(
                    "Language '{}' is configured more than once",
                    name
                )));
            }
            if language.run.trim().is_empty() {
                return Err(SandboxError::ConfigError(format!(
                    "Language '{}' has an empty run command",
                    name
                )));
            }
            for file in [&language.source_file, &language.output_file] {
                if file.is_empty()
                    || file.contains('/')
                    || file.contains(SOURCE_PLACEHOLDER)
                    || RESERVED_FILES.contains(&file.as_str())
                {
                    return Err(SandboxError::ConfigError(format!(
                        "Language '{}' has an invalid file name '{}'",
                        name, file
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> SandboxError {
    SandboxError::ConfigError(message.to_string())
}
