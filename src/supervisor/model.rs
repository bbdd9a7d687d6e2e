//! Normalised view of supervisor state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::AppError;

/// Lifecycle status as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppStatus {
    Online,
    Stopping,
    Stopped,
    Launching,
    Errored,
    /// Anything the supervisor reports that we don't model explicitly.
    Other(String),
}

impl AppStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "online" => Self::Online,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "launching" => Self::Launching,
            "errored" => Self::Errored,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Launching => "launching",
            Self::Errored => "errored",
            Self::Other(s) => s,
        }
    }
}

impl Serialize for AppStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Read-through projection of one supervisor entry. Never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedApp {
    pub name: String,
    pub pm_id: Option<u64>,
    pub status: AppStatus,
    /// `None` when the process is not running.
    pub pid: Option<u32>,
    pub cpu: f64,
    /// Resident memory in bytes.
    pub memory: u64,
    /// Start time, ms since the Unix epoch.
    pub started_at: Option<u64>,
    pub restarts: u64,
    pub script: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub watch: bool,
}

/// Mutating lifecycle actions. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(AppError::UnsupportedAction {
                action: other.to_string(),
            }),
        }
    }
}

/// Everything the supervisor needs to start a new entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppDeclaration {
    pub name: String,
    /// Relative to `cwd`.
    pub script: PathBuf,
    pub cwd: PathBuf,
    pub env: IndexMap<String, String>,
}

/// Parse a process listing into projections.
///
/// The supervisor can print banners or warnings around the JSON, some of which
/// also start with `[` (`[PM2][WARN] ...`). The payload is the last line that
/// parses as an array. Entries without a name are skipped.
pub fn parse_process_list(raw: &str) -> Result<Vec<ManagedApp>, serde_json::Error> {
    let mut first_err = None;
    for line in raw.lines().rev() {
        let line = line.trim();
        if !line.starts_with('[') {
            continue;
        }
        match serde_json::from_str::<Vec<Value>>(line) {
            Ok(entries) => return Ok(entries.iter().filter_map(project).collect()),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or_else(|| Ok(Vec::new()), Err)
}

fn project(entry: &Value) -> Option<ManagedApp> {
    let name = entry.get("name")?.as_str()?.to_string();
    let env = entry.get("pm2_env").unwrap_or(&Value::Null);
    let monit = entry.get("monit").unwrap_or(&Value::Null);

    let pid = entry
        .get("pid")
        .and_then(Value::as_u64)
        .filter(|&p| p != 0)
        .and_then(|p| u32::try_from(p).ok());

    Some(ManagedApp {
        name,
        pm_id: entry.get("pm_id").and_then(Value::as_u64),
        status: env
            .get("status")
            .and_then(Value::as_str)
            .map_or(AppStatus::Other("unknown".into()), AppStatus::parse),
        pid,
        cpu: monit.get("cpu").and_then(Value::as_f64).unwrap_or(0.0),
        memory: monit.get("memory").and_then(Value::as_u64).unwrap_or(0),
        started_at: env.get("pm_uptime").and_then(Value::as_u64),
        restarts: env.get("restart_time").and_then(Value::as_u64).unwrap_or(0),
        script: env
            .get("pm_exec_path")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        cwd: env.get("pm_cwd").and_then(Value::as_str).map(PathBuf::from),
        watch: env.get("watch").is_some_and(is_watching),
    })
}

/// `watch` is either a bool or a list of watched paths.
fn is_watching(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Array(paths) => !paths.is_empty(),
        Value::String(s) => !s.is_empty() && s != "false",
        _ => false,
    }
}
