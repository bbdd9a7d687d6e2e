//! [`SupervisorPort`] backed by the `pm2` command-line tool.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::model::{Action, AppDeclaration};
use super::port::{PortError, SupervisorPort};
use crate::config::SupervisorConfig;
use crate::shell::process::{run_command, CommandError};

/// Shells out to `pm2` with argv (never through `sh -c`).
pub struct Pm2Cli {
    program: String,
    command_timeout: Duration,
    logs_timeout: Duration,
}

impl Pm2Cli {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            program: config.program.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            logs_timeout: Duration::from_millis(config.logs_timeout_ms),
        }
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<String, PortError> {
        debug!(program = %self.program, ?args, "supervisor command");
        match run_command(&self.program, args, cwd, timeout).await {
            Ok(out) if out.success() => Ok(out.stdout),
            Ok(out) => {
                let message = out.failure_message();
                warn!("{} {} failed: {message}", self.program, args.join(" "));
                Err(PortError::Failed {
                    message,
                    stdout: out.stdout,
                })
            }
            Err(CommandError::Timeout {
                after,
                partial_stdout,
            }) => {
                warn!("{} {} timed out after {after:?}", self.program, args.join(" "));
                Err(PortError::Timeout {
                    after,
                    stdout: partial_stdout,
                })
            }
            Err(e) => {
                warn!("{} unavailable: {e}", self.program);
                Err(PortError::Unavailable(e.to_string()))
            }
        }
    }

    async fn cmd(&self, args: &[&str]) -> Result<String, PortError> {
        self.run(args, None, self.command_timeout).await
    }
}

#[async_trait]
impl SupervisorPort for Pm2Cli {
    async fn list(&self) -> Result<String, PortError> {
        self.cmd(&["jlist"]).await
    }

    async fn control(&self, name: &str, action: Action) -> Result<String, PortError> {
        self.cmd(&[action.as_str(), name]).await
    }

    async fn start_watching(&self, name: &str, watch: bool) -> Result<String, PortError> {
        if watch {
            self.cmd(&["start", name, "--watch"]).await
        } else {
            self.cmd(&["start", name, "--watch", "false"]).await
        }
    }

    async fn logs(&self, name: &str, lines: usize) -> Result<String, PortError> {
        let lines = lines.to_string();
        self.run(
            &["logs", name, "--nostream", "--lines", &lines],
            None,
            self.logs_timeout,
        )
        .await
    }

    async fn flush(&self, name: &str) -> Result<String, PortError> {
        self.cmd(&["flush", name]).await
    }

    async fn delete(&self, name: &str) -> Result<String, PortError> {
        self.cmd(&["delete", name]).await
    }

    async fn register(&self, app: &AppDeclaration) -> Result<String, PortError> {
        let file = app.cwd.join(format!(".opsdeck-{}.json", app.name));
        let body = serde_json::to_value(app)
            .and_then(|app| serde_json::to_vec_pretty(&json!({ "apps": [app] })))
            .map_err(|e| PortError::Unavailable(format!("encode process file: {e}")))?;
        tokio::fs::write(&file, body).await.map_err(|e| {
            PortError::Unavailable(format!("write {}: {e}", file.display()))
        })?;

        let file_arg = file.to_string_lossy().into_owned();
        let result = self
            .run(&["start", &file_arg], Some(&app.cwd), self.command_timeout)
            .await;

        if let Err(e) = tokio::fs::remove_file(&file).await {
            warn!("Failed to remove process file {}: {e}", file.display());
        }
        result
    }

    async fn save(&self) -> Result<String, PortError> {
        self.cmd(&["save"]).await
    }

    async fn version(&self) -> Result<String, PortError> {
        self.cmd(&["--version"]).await
    }
}
