//! Dependency installation for newly added apps.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::shell::process::{run_command, CommandError};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("install command is empty")]
    NotConfigured,
    #[error("{0}")]
    Failed(String),
    #[error("install timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs the ecosystem's install step in an app's working directory.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, working_dir: &Path) -> Result<(), InstallError>;
}

/// Installer that runs a fixed argv (e.g. `npm install --production`).
pub struct CommandInstaller {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandInstaller {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, working_dir: &Path) -> Result<(), InstallError> {
        let Some((program, rest)) = self.argv.split_first() else {
            return Err(InstallError::NotConfigured);
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        info!("Installing dependencies in {}", working_dir.display());

        match run_command(program, &args, Some(working_dir), self.timeout).await {
            Ok(out) if out.success() => {
                info!(
                    "Dependencies installed in {} ({} ms)",
                    working_dir.display(),
                    out.duration_ms
                );
                Ok(())
            }
            Ok(out) => {
                warn!("{program} failed in {}: {}", working_dir.display(), out.failure_message());
                Err(InstallError::Failed(out.failure_message()))
            }
            Err(CommandError::Timeout { after, .. }) => Err(InstallError::Timeout(after)),
            Err(e) => Err(InstallError::Failed(e.to_string())),
        }
    }
}
