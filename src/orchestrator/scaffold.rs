//! Working-directory provisioning.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ScaffoldConfig;
use crate::{AppError, Result};

/// Prepares a session's working directory from a starter template.
#[derive(Debug, Clone)]
pub struct Scaffolder {
    shell: String,
    script: Option<PathBuf>,
}

impl Scaffolder {
    /// Build from the `[scaffold]` config section.
    #[must_use]
    pub fn from_config(config: &ScaffoldConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            script: config.script.clone(),
        }
    }

    /// Provision `directory` with `template`.
    ///
    /// With a script configured, runs `<shell> <script> <directory>
    /// <template>` and requires a zero exit code. Without one, only the
    /// directory is created.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the script is missing,
    /// `AppError::Process` if it fails, and `AppError::Io` if the directory
    /// cannot be created.
    pub async fn scaffold(&self, directory: &Path, template: &str) -> Result<()> {
        if let Some(parent) = directory.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let Some(script) = &self.script else {
            tokio::fs::create_dir_all(directory).await?;
            debug!(directory = %directory.display(), "created working directory");
            return Ok(());
        };

        if !script.is_file() {
            return Err(AppError::NotFound(format!(
                "scaffold script {}",
                script.display()
            )));
        }

        let output = Command::new(&self.shell)
            .arg(script)
            .arg(directory)
            .arg(template)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Process(format!("failed to run {}: {err}", self.shell)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(AppError::Process(format!(
                "scaffold script exited with {}: {tail}",
                output.status.code().unwrap_or(-1)
            )));
        }

        info!(directory = %directory.display(), template, "working directory scaffolded");
        Ok(())
    }
}
