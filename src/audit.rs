//! In-memory audit trail of operator actions.
//!
//! Fixed-size ring buffer (`[audit] max_entries`); the oldest entries are
//! dropped when full. Ids are monotonic so clients can poll for "everything
//! after N" without gaps. Nothing is persisted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AppAdd,
    AppRemove,
    AppStart,
    AppStop,
    AppRestart,
    AppToggleWatch,
    AppFlushLogs,
    AppLogs,
    TerminalOpen,
    TerminalClose,
}

impl AuditAction {
    /// Audit action for a lifecycle verb.
    pub fn for_lifecycle(action: crate::supervisor::Action) -> Self {
        use crate::supervisor::Action;
        match action {
            Action::Start => Self::AppStart,
            Action::Stop => Self::AppStop,
            Action::Restart => Self::AppRestart,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp_ms: u64,
    pub username: String,
    pub action: AuditAction,
    /// App name or terminal session id.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    next_id: AtomicU64,
    max_entries: usize,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_entries)),
            next_id: AtomicU64::new(1),
            max_entries,
        }
    }

    /// Append an entry and return its id.
    pub async fn record(
        &self,
        username: &str,
        action: AuditAction,
        target: &str,
        detail: Option<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

        let entry = AuditEntry {
            id,
            timestamp_ms,
            username: username.to_string(),
            action,
            target: target.to_string(),
            detail,
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Entries with `id > since_id`, oldest first, at most `limit`.
    pub async fn read_since(&self, since_id: u64, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.id > since_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// The newest `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}
