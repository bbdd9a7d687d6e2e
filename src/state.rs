//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditLog;
use crate::auth::{SessionStore, StaticSessionStore};
use crate::config::Config;
use crate::registry::RegistryPolicy;
use crate::supervisor::{Pm2Cli, SupervisorClient, SupervisorPort};
use crate::terminal::{TerminalManager, TerminalOptions};

/// Shared application state for the opsdeck server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Validated command surface over the external process supervisor.
    pub supervisor: SupervisorClient,
    /// Live terminal sessions.
    pub terminals: TerminalManager,
    /// Established operator sessions, keyed by token.
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<AuditLog>,
}

impl AppState {
    /// Wire collaborators explicitly (tests inject fakes here).
    pub fn new(
        config: Config,
        port: Arc<dyn SupervisorPort>,
        registry: RegistryPolicy,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let supervisor = SupervisorClient::new(port, registry, config.supervisor.clone());
        let terminals = TerminalManager::new(TerminalOptions::from_config(&config.terminal));
        let audit = Arc::new(AuditLog::new(config.audit.max_entries));
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            supervisor,
            terminals,
            sessions,
            audit,
        }
    }

    /// Production wiring: pm2 CLI, command installer, operators from config.
    pub fn from_config(config: Config) -> Self {
        let port = Arc::new(Pm2Cli::new(&config.supervisor));
        let registry = RegistryPolicy::from_config(&config.registry);
        let sessions = Arc::new(StaticSessionStore::new(&config.auth.operators));
        Self::new(config, port, registry, sessions)
    }
}
