//! The narrow command surface of the external process supervisor.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::model::{Action, AppDeclaration};

/// Failure talking to the supervisor. Never a statement about the caller's
/// input; the client maps these onto `SupervisorUnavailable` / `Timeout`.
#[derive(Debug, Error)]
pub enum PortError {
    /// The supervisor could not be reached at all (binary missing, spawn failed).
    #[error("{0}")]
    Unavailable(String),
    /// The command ran and reported failure.
    #[error("{message}")]
    Failed { message: String, stdout: String },
    /// The command exceeded its budget and was killed.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration, stdout: String },
}

impl PortError {
    /// Whatever stdout the command produced before failing.
    pub fn partial_stdout(&self) -> &str {
        match self {
            Self::Unavailable(_) => "",
            Self::Failed { stdout, .. } | Self::Timeout { stdout, .. } => stdout,
        }
    }
}

/// One method per supervisor command. Implementations are stateless
/// translators; all policy lives in [`super::SupervisorClient`].
#[async_trait]
pub trait SupervisorPort: Send + Sync {
    /// Raw process listing (JSON array as emitted by the supervisor).
    async fn list(&self) -> Result<String, PortError>;
    /// Start, stop or restart an existing entry. Returns the acknowledgement.
    async fn control(&self, name: &str, action: Action) -> Result<String, PortError>;
    /// Start an existing entry with file watching switched on or off.
    async fn start_watching(&self, name: &str, watch: bool) -> Result<String, PortError>;
    async fn logs(&self, name: &str, lines: usize) -> Result<String, PortError>;
    async fn flush(&self, name: &str) -> Result<String, PortError>;
    async fn delete(&self, name: &str) -> Result<String, PortError>;
    /// Declarative start of a new entry.
    async fn register(&self, app: &AppDeclaration) -> Result<String, PortError>;
    /// Persist the registration list across supervisor restarts.
    async fn save(&self) -> Result<String, PortError>;
    /// The supervisor's own version string.
    async fn version(&self) -> Result<String, PortError>;
}
