//! App registry policy: what may be registered with the supervisor, and how.
//!
//! Pure validation (names, script paths) lives here alongside the env-file and
//! dependency-install helpers that an add needs. Nothing in this module talks
//! to the supervisor itself; see [`crate::supervisor::client`].

pub mod envfile;
pub mod install;
pub mod name;
pub mod script;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::config::RegistryConfig;
use crate::error::AppError;

pub use envfile::EnvCheck;
pub use install::{CommandInstaller, DependencyInstaller, InstallError};
pub use name::AppName;
pub use script::ScriptLocation;

/// Registration policy plus the installer used when a project has a manifest.
#[derive(Clone)]
pub struct RegistryPolicy {
    config: RegistryConfig,
    installer: Arc<dyn DependencyInstaller>,
}

impl RegistryPolicy {
    pub fn new(config: RegistryConfig, installer: Arc<dyn DependencyInstaller>) -> Self {
        Self { config, installer }
    }

    /// Production policy: installs with the configured argv.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let installer = CommandInstaller::new(
            config.install_command.clone(),
            Duration::from_secs(config.install_timeout_secs),
        );
        Self::new(config.clone(), Arc::new(installer))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn validate_name(&self, raw: &str) -> Result<AppName, AppError> {
        AppName::parse(raw)
    }

    pub fn locate_script(&self, raw: &str) -> Result<ScriptLocation, AppError> {
        script::locate_script(raw, &self.config.script_extension, &self.config.manifest_file)
    }

    pub fn env_path(&self, working_dir: &Path) -> std::path::PathBuf {
        working_dir.join(&self.config.env_file)
    }

    pub fn check_env(&self, raw_script: &str) -> Result<EnvCheck, AppError> {
        let location = self.locate_script(raw_script)?;
        Ok(envfile::check_env(
            &location.working_dir,
            &self.config.env_file,
            &self.config.env_example_file,
        ))
    }

    pub fn load_env(&self, working_dir: &Path) -> std::io::Result<IndexMap<String, String>> {
        envfile::load_env_file(&self.env_path(working_dir))
    }

    pub async fn install(&self, working_dir: &Path) -> Result<(), InstallError> {
        self.installer.install(working_dir).await
    }
}
