//! In-memory supervisor and installer for tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::json;

use super::model::{Action, AppDeclaration};
use super::port::{PortError, SupervisorPort};
use crate::registry::{DependencyInstaller, InstallError};

#[derive(Debug, Clone)]
pub struct FakeApp {
    pub name: String,
    pub status: &'static str,
    pub watch: bool,
    pub cwd: PathBuf,
    pub script: PathBuf,
    pub env: IndexMap<String, String>,
}

#[derive(Default)]
struct State {
    apps: Vec<FakeApp>,
    calls: Vec<String>,
    fail_list: bool,
    fail_save: bool,
    logs: Option<Result<String, (bool, String)>>,
}

/// Behaves like a tiny pm2: keeps entries in memory and records every call.
#[derive(Default)]
pub struct FakeSupervisor {
    state: Mutex<State>,
}

impl FakeSupervisor {
    pub fn with_apps(names: &[&str]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            for name in names {
                state.apps.push(FakeApp {
                    name: (*name).to_string(),
                    status: "online",
                    watch: false,
                    cwd: PathBuf::from("/apps").join(name),
                    script: PathBuf::from("index.js"),
                    env: IndexMap::new(),
                });
            }
        }
        fake
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than listings.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "jlist" && c != "--version")
            .collect()
    }

    pub fn app(&self, name: &str) -> Option<FakeApp> {
        let state = self.state.lock().unwrap();
        state.apps.iter().find(|a| a.name == name).cloned()
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.state.lock().unwrap().fail_save = fail;
    }

    /// Make `logs` fail after emitting `partial`; `timeout` picks the error kind.
    pub fn set_failing_logs(&self, partial: &str, timeout: bool) {
        self.state.lock().unwrap().logs = Some(Err((timeout, partial.to_string())));
    }

    pub fn set_logs(&self, text: &str) {
        self.state.lock().unwrap().logs = Some(Ok(text.to_string()));
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

fn not_found(name: &str) -> PortError {
    PortError::Failed {
        message: format!("[PM2][ERROR] Process or Namespace {name} not found"),
        stdout: String::new(),
    }
}

#[async_trait]
impl SupervisorPort for FakeSupervisor {
    async fn list(&self) -> Result<String, PortError> {
        let state = self.record("jlist".into());
        if state.fail_list {
            return Err(PortError::Unavailable("spawn pm2: No such file or directory".into()));
        }
        let entries: Vec<_> = state
            .apps
            .iter()
            .enumerate()
            .map(|(i, app)| {
                let pid = if app.status == "online" { 1000 + i } else { 0 };
                json!({
                    "name": app.name,
                    "pm_id": i,
                    "pid": pid,
                    "monit": { "memory": 1024, "cpu": 0 },
                    "pm2_env": {
                        "status": app.status,
                        "pm_cwd": app.cwd,
                        "pm_exec_path": app.cwd.join(&app.script),
                        "restart_time": 0,
                        "watch": app.watch,
                        "env": app.env,
                    }
                })
            })
            .collect();
        Ok(serde_json::Value::Array(entries).to_string())
    }

    async fn control(&self, name: &str, action: Action) -> Result<String, PortError> {
        let mut state = self.record(format!("{action} {name}"));
        let app = state
            .apps
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| not_found(name))?;
        app.status = if action == Action::Stop { "stopped" } else { "online" };
        Ok(format!("[PM2] {action} {name} ✓\n"))
    }

    async fn start_watching(&self, name: &str, watch: bool) -> Result<String, PortError> {
        let mut state = self.record(format!("start {name} --watch {watch}"));
        let app = state
            .apps
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| not_found(name))?;
        app.status = "online";
        app.watch = watch;
        Ok(String::new())
    }

    async fn logs(&self, name: &str, lines: usize) -> Result<String, PortError> {
        let state = self.record(format!("logs {name} {lines}"));
        match &state.logs {
            None => Ok(format!("{name} | line 1\n")),
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err((true, partial))) => Err(PortError::Timeout {
                after: Duration::from_secs(5),
                stdout: partial.clone(),
            }),
            Some(Err((false, partial))) => Err(PortError::Failed {
                message: "log file unreadable".into(),
                stdout: partial.clone(),
            }),
        }
    }

    async fn flush(&self, name: &str) -> Result<String, PortError> {
        self.record(format!("flush {name}"));
        Ok(String::new())
    }

    async fn delete(&self, name: &str) -> Result<String, PortError> {
        let mut state = self.record(format!("delete {name}"));
        let before = state.apps.len();
        state.apps.retain(|a| a.name != name);
        if state.apps.len() == before {
            return Err(not_found(name));
        }
        Ok(String::new())
    }

    async fn register(&self, app: &AppDeclaration) -> Result<String, PortError> {
        let mut state = self.record(format!("register {}", app.name));
        state.apps.push(FakeApp {
            name: app.name.clone(),
            status: "online",
            watch: false,
            cwd: app.cwd.clone(),
            script: app.script.clone(),
            env: app.env.clone(),
        });
        Ok(String::new())
    }

    async fn save(&self) -> Result<String, PortError> {
        let state = self.record("save".into());
        if state.fail_save {
            return Err(PortError::Failed {
                message: "EACCES: dump file".into(),
                stdout: String::new(),
            });
        }
        Ok(String::new())
    }

    async fn version(&self) -> Result<String, PortError> {
        let state = self.record("--version".into());
        if state.fail_list {
            return Err(PortError::Unavailable("spawn pm2: No such file or directory".into()));
        }
        Ok("5.4.2\n".into())
    }
}

/// Records every directory it was asked to install into.
#[derive(Default)]
pub struct FakeInstaller {
    pub dirs: Mutex<Vec<PathBuf>>,
    pub fail: bool,
}

impl FakeInstaller {
    pub fn failing() -> Self {
        Self {
            dirs: Mutex::default(),
            fail: true,
        }
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    async fn install(&self, working_dir: &Path) -> Result<(), InstallError> {
        self.dirs.lock().unwrap().push(working_dir.to_path_buf());
        if self.fail {
            return Err(InstallError::Failed("npm ERR! code E404".into()));
        }
        Ok(())
    }
}
