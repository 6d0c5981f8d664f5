//! Configuration module for the sandbox service
//!
//! YAML files are parsed into `SandboxConfig`, then environment overrides are
//! applied and the result is validated before anything else sees it.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::*;
pub use types::*;


use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file, falling back to defaults when the
/// file does not exist.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file_or_default(path).await
}
