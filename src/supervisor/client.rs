//! Validated command surface over a [`SupervisorPort`].
//!
//! Every mutating call validates its input before the port is touched and
//! re-reads supervisor state rather than trusting anything cached. No lock is
//! taken around the supervisor: a check followed by a mutation can race with
//! another operator, and the supervisor's own per-command atomicity is all we
//! rely on.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::model::{parse_process_list, Action, AppDeclaration, ManagedApp};
use super::port::{PortError, SupervisorPort};
use crate::config::SupervisorConfig;
use crate::error::{AddStep, AppError};
use crate::registry::envfile::{replace_env_file, EnvBackup};
use crate::registry::{AppName, EnvCheck, RegistryPolicy};

const NO_LOGS: &str = "No logs available";

/// Body of an add request.
#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub name: String,
    pub script_path: String,
    #[serde(default)]
    pub env_text: Option<String>,
}

/// What a successful add did.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub name: String,
    pub working_dir: PathBuf,
    pub script: PathBuf,
    pub env_keys: Vec<String>,
    pub installed: bool,
}

#[derive(Clone)]
pub struct SupervisorClient {
    port: Arc<dyn SupervisorPort>,
    registry: RegistryPolicy,
    config: SupervisorConfig,
}

impl SupervisorClient {
    pub fn new(port: Arc<dyn SupervisorPort>, registry: RegistryPolicy, config: SupervisorConfig) -> Self {
        Self {
            port,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &RegistryPolicy {
        &self.registry
    }

    /// All managed apps. Never fails: an unreachable supervisor or an
    /// unparseable listing yields an empty list and a warning.
    pub async fn list(&self) -> Vec<ManagedApp> {
        match self.try_list().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!("Listing managed apps failed, returning none: {e}");
                Vec::new()
            }
        }
    }

    /// Fresh listing that reports supervisor outages instead of hiding them.
    pub async fn try_list(&self) -> Result<Vec<ManagedApp>, AppError> {
        let raw = self
            .port
            .list()
            .await
            .map_err(|e| port_error("list", e))?;
        parse_process_list(&raw).map_err(|e| AppError::SupervisorUnavailable {
            detail: format!("unreadable process list: {e}"),
        })
    }

    /// Supervisor version, or `None` when it cannot be asked.
    pub async fn version(&self) -> Option<String> {
        match self.port.version().await {
            Ok(raw) => raw.lines().map(str::trim).rfind(|l| !l.is_empty()).map(str::to_string),
            Err(e) => {
                warn!("Supervisor version unavailable: {e}");
                None
            }
        }
    }

    pub async fn find(&self, name: &str) -> Result<Option<ManagedApp>, AppError> {
        Ok(self.try_list().await?.into_iter().find(|a| a.name == name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.find(name).await?.is_some())
    }

    /// Validate `raw` and fetch the live entry, failing with `NotFound`.
    async fn require(&self, raw: &str) -> Result<(AppName, ManagedApp), AppError> {
        let name = self.registry.validate_name(raw)?;
        match self.find(name.as_str()).await? {
            Some(app) => Ok((name, app)),
            None => Err(AppError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Start, stop or restart. Returns the action performed and the
    /// supervisor's acknowledgement verbatim.
    pub async fn act(&self, name: &str, action: &str) -> Result<(Action, String), AppError> {
        let name = self.registry.validate_name(name)?;
        let action: Action = action.parse()?;
        let (name, _) = self.require(name.as_str()).await?;

        let ack = self
            .port
            .control(name.as_str(), action)
            .await
            .map_err(|e| port_error(action.as_str(), e))?;
        info!("{action} {name}");
        Ok((action, ack))
    }

    /// Up to `lines` recent log lines. Supervisor failures degrade to whatever
    /// output was captured before the failure.
    pub async fn logs(&self, name: &str, lines: Option<usize>) -> Result<String, AppError> {
        let (name, _) = self.require(name).await?;
        let lines = lines
            .unwrap_or(self.config.default_log_lines)
            .clamp(1, self.config.max_log_lines.max(1));

        match self.port.logs(name.as_str(), lines).await {
            Ok(text) if text.trim().is_empty() => Ok(NO_LOGS.to_string()),
            Ok(text) => Ok(text),
            Err(e) => {
                let partial = e.partial_stdout();
                if !partial.trim().is_empty() {
                    warn!("Logs for {name} incomplete ({e}), returning partial output");
                    return Ok(partial.to_string());
                }
                match e {
                    PortError::Failed { message, .. } => {
                        warn!("Logs for {name} unavailable: {message}");
                        Ok(NO_LOGS.to_string())
                    }
                    other => Err(port_error("logs", other)),
                }
            }
        }
    }

    pub async fn flush_logs(&self, name: &str) -> Result<(), AppError> {
        let (name, _) = self.require(name).await?;
        self.port
            .flush(name.as_str())
            .await
            .map_err(|e| port_error("flush", e))?;
        info!("Flushed logs for {name}");
        Ok(())
    }

    /// Report whether the project owning `script` has an env file yet.
    pub fn check_env(&self, script: &str) -> Result<EnvCheck, AppError> {
        self.registry.check_env(script)
    }

    /// Register a new app. All validation happens before the supervisor is
    /// written to; a failure after the env file was written puts it back.
    pub async fn add(&self, req: &AddRequest) -> Result<AddOutcome, AppError> {
        let name = self.registry.validate_name(&req.name)?;
        if self.exists(name.as_str()).await? {
            return Err(AppError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let location = self.registry.locate_script(&req.script_path)?;
        let working_dir = location.working_dir.clone();

        let env_text = req.env_text.as_deref().filter(|t| !t.trim().is_empty());
        let env_path = self.registry.env_path(&working_dir);
        if env_text.is_none() && !env_path.is_file() {
            return Err(AppError::EnvRequired {
                dir: working_dir,
                env_file: self.registry.config().env_file.clone(),
            });
        }

        let backup = match env_text {
            Some(text) => Some(replace_env_file(&env_path, text).map_err(|e| {
                AppError::PartialFailure {
                    step: AddStep::WriteEnv,
                    detail: format!("write {}: {e}", env_path.display()),
                    rolled_back: true,
                }
            })?),
            None => None,
        };

        let env = match self.registry.load_env(&working_dir) {
            Ok(env) => env,
            Err(e) => {
                restore_env(backup);
                return Err(AppError::PartialFailure {
                    step: AddStep::WriteEnv,
                    detail: format!("read {}: {e}", env_path.display()),
                    rolled_back: true,
                });
            }
        };

        if location.has_manifest {
            if let Err(e) = self.registry.install(&working_dir).await {
                restore_env(backup);
                return Err(AppError::DependencyInstallFailed {
                    dir: working_dir,
                    detail: e.to_string(),
                });
            }
        }

        // Installs can take minutes; someone may have claimed the name meanwhile.
        match self.exists(name.as_str()).await {
            Ok(false) => {}
            Ok(true) => {
                restore_env(backup);
                return Err(AppError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                restore_env(backup);
                return Err(e);
            }
        }

        let declaration = AppDeclaration {
            name: name.to_string(),
            script: location.relative_script.clone(),
            cwd: working_dir.clone(),
            env,
        };
        if let Err(e) = self.port.register(&declaration).await {
            let rolled_back = self.undo_register(&name).await;
            restore_env(backup);
            return Err(AppError::PartialFailure {
                step: AddStep::Register,
                detail: e.to_string(),
                rolled_back,
            });
        }
        if let Err(e) = self.port.save().await {
            let rolled_back = self.undo_register(&name).await;
            restore_env(backup);
            return Err(AppError::PartialFailure {
                step: AddStep::Persist,
                detail: e.to_string(),
                rolled_back,
            });
        }

        info!(
            "Registered {name} ({} in {})",
            location.relative_script.display(),
            working_dir.display()
        );
        Ok(AddOutcome {
            name: name.to_string(),
            working_dir,
            script: location.relative_script,
            env_keys: declaration.env.keys().cloned().collect(),
            installed: location.has_manifest,
        })
    }

    /// Remove an entry left by a failed add. Returns true when the supervisor
    /// no longer lists it.
    async fn undo_register(&self, name: &AppName) -> bool {
        match self.exists(name.as_str()).await {
            Ok(false) => true,
            Ok(true) => match self.port.delete(name.as_str()).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Rollback of {name} failed: {e}");
                    false
                }
            },
            Err(e) => {
                warn!("Cannot confirm rollback of {name}: {e}");
                false
            }
        }
    }

    /// Deregister and persist. The app's files are left alone.
    pub async fn remove(&self, name: &str) -> Result<(), AppError> {
        let (name, _) = self.require(name).await?;
        self.port
            .delete(name.as_str())
            .await
            .map_err(|e| port_error("delete", e))?;
        self.port.save().await.map_err(|e| port_error("save", e))?;
        info!("Removed {name}");
        Ok(())
    }

    /// Flip watch mode by stopping and restarting the app. Not atomic: if the
    /// start fails the app is left stopped. Returns the new flag.
    pub async fn toggle_watch(&self, name: &str) -> Result<bool, AppError> {
        let (name, app) = self.require(name).await?;
        let watch = !app.watch;

        self.port
            .control(name.as_str(), Action::Stop)
            .await
            .map_err(|e| port_error("stop", e))?;
        self.port
            .start_watching(name.as_str(), watch)
            .await
            .map_err(|e| port_error("start", e))?;
        self.port.save().await.map_err(|e| port_error("save", e))?;
        info!("Watch for {name} is now {}", if watch { "on" } else { "off" });
        Ok(watch)
    }
}

fn restore_env(backup: Option<EnvBackup>) {
    if let Some(backup) = backup {
        if let Err(e) = backup.restore() {
            warn!("Failed to restore env file: {e}");
        }
    }
}

fn port_error(operation: &str, e: PortError) -> AppError {
    match e {
        PortError::Timeout { after, .. } => AppError::Timeout {
            operation: format!("supervisor {operation}"),
            after,
        },
        other => AppError::SupervisorUnavailable {
            detail: format!("{operation}: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::error::ErrorKind;
    use crate::supervisor::fake::{FakeInstaller, FakeSupervisor};
    use crate::supervisor::model::AppStatus;
    use std::path::Path;

    struct Harness {
        fake: Arc<FakeSupervisor>,
        installer: Arc<FakeInstaller>,
        client: SupervisorClient,
    }

    fn harness_with(fake: FakeSupervisor, installer: FakeInstaller) -> Harness {
        let fake = Arc::new(fake);
        let installer = Arc::new(installer);
        let registry = RegistryPolicy::new(RegistryConfig::default(), installer.clone());
        let client = SupervisorClient::new(fake.clone(), registry, SupervisorConfig::default());
        Harness {
            fake,
            installer,
            client,
        }
    }

    fn harness(apps: &[&str]) -> Harness {
        harness_with(FakeSupervisor::with_apps(apps), FakeInstaller::default())
    }

    /// `<tmp>/svc2/{package.json,index.js}`, canonicalised.
    fn project(tmp: &tempfile::TempDir) -> PathBuf {
        let dir = tmp.path().canonicalize().unwrap().join("svc2");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        std::fs::write(dir.join("index.js"), "").unwrap();
        dir
    }

    fn add_req(name: &str, script: &Path, env: Option<&str>) -> AddRequest {
        AddRequest {
            name: name.into(),
            script_path: script.to_string_lossy().into_owned(),
            env_text: env.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_invalid_name_makes_no_supervisor_call() {
        let h = harness(&["svc1"]);
        for bad in ["my app", "", "svc1;reboot", "svc1 "] {
            assert_eq!(
                h.client.act(bad, "start").await.unwrap_err().kind(),
                ErrorKind::Validation
            );
            assert_eq!(h.client.logs(bad, None).await.unwrap_err().kind(), ErrorKind::Validation);
            assert_eq!(h.client.flush_logs(bad).await.unwrap_err().kind(), ErrorKind::Validation);
            assert_eq!(h.client.remove(bad).await.unwrap_err().kind(), ErrorKind::Validation);
            assert_eq!(h.client.toggle_watch(bad).await.unwrap_err().kind(), ErrorKind::Validation);
            let req = add_req(bad, Path::new("/apps/x/index.js"), Some("A=1"));
            assert_eq!(h.client.add(&req).await.unwrap_err().kind(), ErrorKind::Validation);
        }
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_act_on_missing_app_is_not_found() {
        let h = harness(&["other"]);
        let err = h.client.act("svc1", "start").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { ref name } if name == "svc1"));
        assert!(h.fake.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_action_rejected_before_supervisor() {
        let h = harness(&["svc1"]);
        let err = h.client.act("svc1", "reload").await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedAction { .. }));
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_version_degrades_to_none() {
        let h = harness(&[]);
        assert_eq!(h.client.version().await.as_deref(), Some("5.4.2"));
        h.fake.set_fail_list(true);
        assert_eq!(h.client.version().await, None);
    }

    #[tokio::test]
    async fn test_act_returns_ack_verbatim() {
        let h = harness(&["svc1"]);
        let (action, ack) = h.client.act("svc1", "stop").await.unwrap();
        assert_eq!(action, Action::Stop);
        assert_eq!(ack, "[PM2] stop svc1 ✓\n");
        assert_eq!(h.fake.mutations(), ["stop svc1"]);
        assert_eq!(h.client.list().await[0].status, AppStatus::Stopped);
    }

    #[tokio::test]
    async fn test_add_svc2_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        let h = harness(&[]);

        let outcome = h
            .client
            .add(&add_req("svc2", &dir.join("index.js"), Some("PORT=4000")))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dir.join(".env")).unwrap(), "PORT=4000\n");
        assert_eq!(h.installer.dirs(), [dir.clone()]);
        assert_eq!(outcome.working_dir, dir);
        assert_eq!(outcome.script, PathBuf::from("index.js"));
        assert!(outcome.installed);

        let registered = h.fake.app("svc2").unwrap();
        assert_eq!(registered.env["PORT"], "4000");
        assert_eq!(registered.cwd, dir);

        let apps = h.client.list().await;
        let svc2 = apps.iter().find(|a| a.name == "svc2").unwrap();
        assert_eq!(svc2.status, AppStatus::Online);
        assert!(h.client.exists("svc2").await.unwrap());
        assert_eq!(h.fake.mutations(), ["register svc2", "save"]);
    }

    #[tokio::test]
    async fn test_remove_then_exists_is_false() {
        let h = harness(&["svc1"]);
        h.client.remove("svc1").await.unwrap();
        assert!(!h.client.exists("svc1").await.unwrap());
        assert_eq!(h.fake.mutations(), ["delete svc1", "save"]);
    }

    #[tokio::test]
    async fn test_add_without_env_leaves_registrations_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        let h = harness(&["svc1"]);
        let before: Vec<_> = h.client.list().await.into_iter().map(|a| a.name).collect();

        for env in [None, Some("   \n")] {
            let err = h
                .client
                .add(&add_req("svc2", &dir.join("index.js"), env))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::EnvRequired { dir: ref d, .. } if *d == dir));
        }

        let after: Vec<_> = h.client.list().await.into_iter().map(|a| a.name).collect();
        assert_eq!(before, after);
        assert!(h.fake.mutations().is_empty());
        assert!(h.installer.dirs().is_empty());
    }

    #[tokio::test]
    async fn test_add_uses_existing_env_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        std::fs::write(dir.join(".env"), "# keep\nDB='postgres://x'\nbroken line\n").unwrap();
        let h = harness(&[]);

        let outcome = h
            .client
            .add(&add_req("svc2", &dir.join("index.js"), None))
            .await
            .unwrap();
        assert_eq!(outcome.env_keys, ["DB"]);
        assert_eq!(h.fake.app("svc2").unwrap().env["DB"], "postgres://x");
    }

    #[tokio::test]
    async fn test_add_existing_name_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        let h = harness(&["svc2"]);
        let err = h
            .client
            .add(&add_req("svc2", &dir.join("index.js"), Some("PORT=1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!dir.join(".env").exists());
    }

    #[tokio::test]
    async fn test_add_rejects_bad_script_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        let h = harness(&[]);
        for script in [dir.join("index.py"), dir.join("missing.js"), dir.join("a|b.js")] {
            let err = h
                .client
                .add(&add_req("svc2", &script, Some("PORT=1")))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidPath { .. }), "{script:?}");
        }
        assert!(h.fake.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_restores_env_and_registers_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        std::fs::write(dir.join(".env"), "OLD=1\n").unwrap();
        let h = harness_with(FakeSupervisor::default(), FakeInstaller::failing());

        let err = h
            .client
            .add(&add_req("svc2", &dir.join("index.js"), Some("NEW=2")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DependencyInstallFailed { .. }));
        assert_eq!(std::fs::read_to_string(dir.join(".env")).unwrap(), "OLD=1\n");
        assert!(h.fake.mutations().is_empty());
        assert!(!h.client.exists("svc2").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_failure_rolls_back_registration() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = project(&tmp);
        let h = harness(&[]);
        h.fake.set_fail_save(true);

        let err = h
            .client
            .add(&add_req("svc2", &dir.join("index.js"), Some("PORT=4000")))
            .await
            .unwrap_err();
        match err {
            AppError::PartialFailure {
                step, rolled_back, ..
            } => {
                assert_eq!(step, AddStep::Persist);
                assert!(rolled_back);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert!(!h.client.exists("svc2").await.unwrap());
        assert!(!dir.join(".env").exists());
        assert_eq!(h.fake.mutations(), ["register svc2", "save", "delete svc2"]);
    }

    #[tokio::test]
    async fn test_toggle_watch_twice_restores_flag() {
        let h = harness(&["svc1"]);
        assert!(h.client.toggle_watch("svc1").await.unwrap());
        assert!(h.client.find("svc1").await.unwrap().unwrap().watch);
        assert!(!h.client.toggle_watch("svc1").await.unwrap());

        let app = h.client.find("svc1").await.unwrap().unwrap();
        assert!(!app.watch);
        assert_eq!(app.status, AppStatus::Online);
        assert_eq!(
            h.fake.mutations(),
            [
                "stop svc1",
                "start svc1 --watch true",
                "save",
                "stop svc1",
                "start svc1 --watch false",
                "save"
            ]
        );
    }

    #[tokio::test]
    async fn test_logs_clamps_and_degrades() {
        let h = harness(&["svc1"]);
        h.client.logs("svc1", Some(0)).await.unwrap();
        h.client.logs("svc1", Some(1_000_000)).await.unwrap();
        h.client.logs("svc1", None).await.unwrap();
        assert_eq!(
            h.fake.mutations(),
            ["logs svc1 1", "logs svc1 1000", "logs svc1 50"]
        );

        h.fake.set_failing_logs("svc1 | partial\n", false);
        assert_eq!(h.client.logs("svc1", None).await.unwrap(), "svc1 | partial\n");

        h.fake.set_failing_logs("svc1 | slow\n", true);
        assert_eq!(h.client.logs("svc1", None).await.unwrap(), "svc1 | slow\n");

        h.fake.set_failing_logs("", false);
        assert_eq!(h.client.logs("svc1", None).await.unwrap(), NO_LOGS);

        h.fake.set_failing_logs("", true);
        assert_eq!(
            h.client.logs("svc1", None).await.unwrap_err().kind(),
            ErrorKind::Timeout
        );

        h.fake.set_logs("  \n");
        assert_eq!(h.client.logs("svc1", None).await.unwrap(), NO_LOGS);
    }

    #[tokio::test]
    async fn test_outage_is_distinct_from_not_found() {
        let h = harness(&["svc1"]);
        h.fake.set_fail_list(true);

        assert!(h.client.list().await.is_empty());
        let err = h.client.act("svc1", "restart").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalUnavailable);
        assert!(h.client.exists("svc1").await.is_err());
        assert!(h.fake.mutations().is_empty());
    }
}
