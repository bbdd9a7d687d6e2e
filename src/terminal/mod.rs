//! Terminal session manager.
//!
//! Owns every live [`TerminalSession`]. Each session runs as its own task and
//! shares nothing with the others except the shutdown token.

pub mod control;
pub mod pty;
pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::util::expand_home;

pub use control::TermSize;
pub use session::{ClientFrame, CloseReason, ServerFrame, SessionReport, SessionState, TerminalSession};

/// Resolved settings for new sessions.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub shell: String,
    pub working_dir: PathBuf,
    pub term: String,
    pub size: TermSize,
    pub kill_grace: Duration,
    pub drain: Duration,
}

impl TerminalOptions {
    pub fn from_config(config: &TerminalConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            working_dir: expand_home(&config.working_dir),
            term: config.term.clone(),
            size: TermSize {
                rows: config.rows,
                cols: config.cols,
            },
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            drain: Duration::from_millis(config.drain_ms),
        }
    }
}

/// Summary of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub username: String,
    pub opened_at_ms: u64,
    pub state: SessionState,
}

struct SessionEntry {
    username: String,
    opened_at_ms: u64,
    state: watch::Receiver<SessionState>,
}

#[derive(Clone)]
pub struct TerminalManager {
    opts: Arc<TerminalOptions>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    shutdown: CancellationToken,
}

impl TerminalManager {
    pub fn new(opts: TerminalOptions) -> Self {
        Self {
            opts: Arc::new(opts),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &TerminalOptions {
        &self.opts
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one session to completion on the current task. The caller has
    /// already passed the connection gate.
    pub async fn run_session(
        &self,
        id: Uuid,
        username: &str,
        inbound: mpsc::Receiver<ClientFrame>,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> SessionReport {
        let (session, state) =
            TerminalSession::new(id, Arc::clone(&self.opts), self.shutdown.child_token());
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                username: username.to_string(),
                opened_at_ms: now_ms(),
                state,
            },
        );
        info!(session = %id, user = username, "Terminal session opened");

        let report = session.run(inbound, outbound).await;

        self.sessions.write().await.remove(&id);
        report
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<_> = sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                username: entry.username.clone(),
                opened_at_ms: entry.opened_at_ms,
                state: *entry.state.borrow(),
            })
            .collect();
        list.sort_by_key(|s| s.opened_at_ms);
        list
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel every session and wait up to `wait` for them to close.
    pub async fn shutdown(&self, wait: Duration) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = self.session_count().await;
            if remaining == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("{remaining} terminal session(s) still closing at shutdown");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
