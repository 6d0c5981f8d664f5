//! Per-request host directory shared with the execution container.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::errors::SandboxError;

/// A file read back from the workspace, cut at the output cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedText {
    pub text: String,
    pub truncated: bool,
}

impl CapturedText {
    /// Keep at most `max_bytes` bytes, backing off so a multibyte
    /// character is never split at the cut.
    pub fn capped(bytes: &[u8], max_bytes: usize) -> Self {
        let mut end = bytes.len().min(max_bytes);
        if let Err(e) = std::str::from_utf8(&bytes[..end]) {
            // error_len() is None only for a sequence cut short at the end
            if e.error_len().is_none() {
                end = e.valid_up_to();
            }
        }
        Self {
            text: String::from_utf8_lossy(&bytes[..end]).into_owned(),
            truncated: bytes.len() > max_bytes,
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    keep: bool,
    removed: bool,
}

impl Workspace {
    /// Create `<root>/<id>`. The directory must not exist yet.
    pub async fn create(root: &Path, id: &str, keep: bool) -> Result<Self, SandboxError> {
        fs::create_dir_all(root).await.map_err(|e| {
            SandboxError::WorkspaceError(format!(
                "Failed to create workspace root {}: {}",
                root.display(),
                e
            ))
        })?;

        let path = root.join(id);
        fs::create_dir(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => SandboxError::WorkspaceInUse(id.to_string()),
            _ => SandboxError::WorkspaceError(format!(
                "Failed to create workspace {}: {}",
                path.display(),
                e
            )),
        })?;

        // The container may run as an unprivileged user that needs to write
        // its output files here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777)).await?;
        }

        log::debug!("Created workspace {}", path.display());
        Ok(Self {
            path,
            keep,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_file(&self, name: &str, contents: &[u8]) -> Result<(), SandboxError> {
        fs::write(self.path.join(name), contents).await?;
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        fs::try_exists(self.path.join(name)).await.unwrap_or(false)
    }

    /// Read at most `max_bytes` of a file. Missing files read as `None`.
    pub async fn read_capped(
        &self,
        name: &str,
        max_bytes: usize,
    ) -> Result<Option<CapturedText>, SandboxError> {
        let file = match fs::File::open(self.path.join(name)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = Vec::new();
        file.take(max_bytes as u64 + 1)
            .read_to_end(&mut buffer)
            .await?;

        Ok(Some(CapturedText::capped(&buffer, max_bytes)))
    }

    /// Remove the directory unless the workspace is configured to be kept.
    pub async fn cleanup(&mut self) -> Result<(), SandboxError> {
        if self.keep || self.removed {
            return Ok(());
        }
        self.removed = true;
        fs::remove_dir_all(&self.path).await.map_err(|e| {
            SandboxError::WorkspaceError(format!(
                "Failed to remove workspace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        log::debug!("Removed workspace {}", self.path.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep || self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            log::warn!(
                "Failed to remove workspace {} on drop: {}",
                self.path.display(),
                e
            );
        }
    }
}
