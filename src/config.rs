//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `OPSDECK_LISTEN`, `OPSDECK_SHELL`,
//!    `OPSDECK_PM2`, `OPSDECK_OPERATOR_TOKEN`
//! 2. **Config file**: path via `--config <path>`, or `opsdeck.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"
//!
//! [auth]
//! cookie_name = "opsdeck_session"
//!
//! [[auth.operators]]
//! token = "long-random-token"
//! username = "root"
//! role = "super_admin"          # staff | admin | super_admin
//!
//! [terminal]
//! path = "/ws/terminal"
//! shell = "/bin/zsh"            # default: $SHELL, else /bin/sh
//! working_dir = "~"
//! rows = 30
//! cols = 120
//!
//! [supervisor]
//! program = "pm2"
//! command_timeout_ms = 10000
//! logs_timeout_ms = 5000
//!
//! [registry]
//! manifest_file = "package.json"
//! env_file = ".env"
//! install_command = ["npm", "install", "--production"]
//! install_timeout_secs = 120
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::auth::Role;

const DEFAULT_CONFIG_FILE: &str = "opsdeck.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Session lookup settings. Credential storage lives outside opsdeck; the
/// operators listed here are tokens already issued by that layer.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Cookie carrying the session token (default `opsdeck_session`).
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

/// One established operator session.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub token: String,
    pub username: String,
    pub role: Role,
}

/// Interactive terminal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// The only path on which WebSocket upgrades are accepted.
    #[serde(default = "default_terminal_path")]
    pub path: String,
    /// Shell binary. Override with `OPSDECK_SHELL`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Working directory of spawned shells; `~` expands to `$HOME`.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// `TERM` exported to the shell.
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Grace period between SIGHUP and SIGKILL when the client goes away.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// How long to keep relaying buffered output after the shell exits.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
    /// Minimum role allowed to open a terminal (default `super_admin`).
    #[serde(default = "default_terminal_role")]
    pub required_role: Role,
}

/// External process supervisor (pm2) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Supervisor CLI binary (default `pm2`). Override with `OPSDECK_PM2`.
    #[serde(default = "default_pm2")]
    pub program: String,
    /// Bound on every supervisor command other than `logs`.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_logs_timeout_ms")]
    pub logs_timeout_ms: u64,
    #[serde(default = "default_log_lines")]
    pub default_log_lines: usize,
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
}

/// App registration policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Project manifest marking an app's working directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    #[serde(default = "default_env_file")]
    pub env_file: String,
    /// Template shown to operators when no env file exists yet.
    #[serde(default = "default_env_example_file")]
    pub env_example_file: String,
    /// Required script extension, without the dot.
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    /// Dependency-install argv, run in the working directory when a manifest exists.
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
}

/// In-memory audit trail settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_entries")]
    pub max_entries: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_cookie_name() -> String {
    "opsdeck_session".to_string()
}
fn default_terminal_path() -> String {
    "/ws/terminal".to_string()
}
fn default_shell() -> String {
    crate::shell::platform_shell()
}
fn default_working_dir() -> String {
    "~".to_string()
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_rows() -> u16 {
    30
}
fn default_cols() -> u16 {
    120
}
fn default_kill_grace_ms() -> u64 {
    2000
}
fn default_drain_ms() -> u64 {
    250
}
fn default_terminal_role() -> Role {
    Role::SuperAdmin
}
fn default_pm2() -> String {
    "pm2".to_string()
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_logs_timeout_ms() -> u64 {
    5000
}
fn default_log_lines() -> usize {
    50
}
fn default_max_log_lines() -> usize {
    1000
}
fn default_manifest_file() -> String {
    "package.json".to_string()
}
fn default_env_file() -> String {
    ".env".to_string()
}
fn default_env_example_file() -> String {
    ".env.example".to_string()
}
fn default_script_extension() -> String {
    "js".to_string()
}
fn default_install_command() -> Vec<String> {
    vec![
        "npm".to_string(),
        "install".to_string(),
        "--production".to_string(),
    ]
}
fn default_install_timeout_secs() -> u64 {
    120
}
fn default_audit_entries() -> usize {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            operators: Vec::new(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            path: default_terminal_path(),
            shell: default_shell(),
            working_dir: default_working_dir(),
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            kill_grace_ms: default_kill_grace_ms(),
            drain_ms: default_drain_ms(),
            required_role: default_terminal_role(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: default_pm2(),
            command_timeout_ms: default_command_timeout_ms(),
            logs_timeout_ms: default_logs_timeout_ms(),
            default_log_lines: default_log_lines(),
            max_log_lines: default_max_log_lines(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifest_file: default_manifest_file(),
            env_file: default_env_file(),
            env_example_file: default_env_example_file(),
            script_extension: default_script_extension(),
            install_command: default_install_command(),
            install_timeout_secs: default_install_timeout_secs(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: default_audit_entries(),
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

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `opsdeck.toml` in the
    /// current directory is used when present, else compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_string()),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(DEFAULT_CONFIG_FILE.to_string()),
            None => None,
        };
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_toml(&content).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Config::default(),
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("OPSDECK_LISTEN") {
            self.server.listen = listen;
        }
        if let Ok(shell) = std::env::var("OPSDECK_SHELL") {
            self.terminal.shell = shell;
        }
        if let Ok(pm2) = std::env::var("OPSDECK_PM2") {
            self.supervisor.program = pm2;
        }
        if let Ok(token) = std::env::var("OPSDECK_OPERATOR_TOKEN") {
            self.auth.operators.push(OperatorConfig {
                token,
                username: "operator".to_string(),
                role: Role::SuperAdmin,
            });
        }
    }
}
