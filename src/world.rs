//! Per-scenario state: trash directory, remote, clones and the bundle server.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::auth::AuthConfig;
use crate::bundle_server::{BundleServer, random_hex};
use crate::command::{self, CommandResult};
use crate::config::Settings;
use crate::daemon_state::{DaemonProbe, DaemonState, ServiceManager};
use crate::error::{HarnessError, Result};
use crate::layout::ServerLayout;
use crate::remote::RemoteRepo;
use crate::repository::ClonedRepository;
use crate::web_server::{Readiness, WebServer};

const TRASH_PREFIX: &str = "scenario-";
const LOCAL_REMOTE_DIR: &str = "server";
const AUTH_CONFIG_FILE: &str = "auth-config.json";
const README_FILE: &str = "README.md";
const COMMIT_CONTENT_BYTES: usize = 16;
const COMMIT_USER_NAME: &str = "user.name=Bundle Harness";
const COMMIT_USER_EMAIL: &str = "user.email=harness@example.com";

/// A logical user owning one clone per scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Me,
    Another,
}

impl Actor {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Actor::Me => "Me",
            Actor::Another => "Another",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Independent teardown steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    StopWebServer,
    DeleteRoute,
    RemoveTrash,
}

impl TeardownAction {
    pub const ORDER: [TeardownAction; 3] = [
        TeardownAction::StopWebServer,
        TeardownAction::DeleteRoute,
        TeardownAction::RemoveTrash,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub action: TeardownAction,
    pub message: String,
}

/// Failures recorded during teardown. Teardown never stops at the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything one scenario owns. Worlds never share mutable state.
///
/// Teardown stops the web server, deletes the route and removes the trash
/// directory. It runs from [`ScenarioWorld::cleanup`] or, failing that, on drop.
pub struct ScenarioWorld {
    trash: Option<TempDir>,
    trash_path: PathBuf,
    remote: Option<Arc<RemoteRepo>>,
    repositories: HashMap<Actor, ClonedRepository>,
    server: BundleServer,
    daemon: Box<dyn DaemonProbe + Send + Sync>,
    bundle_server_command: PathBuf,
    http_timeout: Duration,
    command_result: Option<CommandResult>,
    torn_down: bool,
}

impl ScenarioWorld {
    /// Allocates a fresh trash directory and a bundle server handle.
    ///
    /// # Errors
    /// Returns error if the settings are unusable or the trash directory
    /// cannot be created.
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let base = settings.trash_directory_base();
        std::fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create trash base {}", base.display()))?;
        let trash = tempfile::Builder::new()
            .prefix(TRASH_PREFIX)
            .tempdir_in(&base)
            .with_context(|| format!("Failed to create trash directory in {}", base.display()))?;
        let trash_path = trash.path().to_path_buf();

        let bundle_server_command = settings.bundle_server_command();
        let web_server = WebServer::new(
            settings.bundle_web_server_command(),
            settings.readiness.marker.clone(),
            settings.readiness_timeout()?,
        );
        let server = BundleServer::new(
            bundle_server_command.clone(),
            ServerLayout::new(settings.server_root()?),
            web_server,
        );

        info!("Scenario trash directory: {}", trash_path.display());
        Ok(Self {
            trash: Some(trash),
            trash_path,
            remote: None,
            repositories: HashMap::new(),
            server,
            daemon: Box::new(ServiceManager::for_host(settings.daemon.label.clone())),
            bundle_server_command,
            http_timeout: settings.http_timeout(),
            command_result: None,
            torn_down: false,
        })
    }

    /// Replaces the host service-manager probe.
    pub fn set_daemon_probe(&mut self, probe: Box<dyn DaemonProbe + Send + Sync>) {
        self.daemon = probe;
    }

    #[must_use]
    pub fn trash_directory(&self) -> &Path {
        &self.trash_path
    }

    #[must_use]
    pub fn server(&self) -> &BundleServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut BundleServer {
        &mut self.server
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Sets the scenario's remote. A remote can be set only once.
    ///
    /// # Errors
    /// Returns a state error if a remote is already set.
    pub fn set_remote(&mut self, remote: RemoteRepo) -> Result<Arc<RemoteRepo>> {
        if self.remote.is_some() {
            return Err(HarnessError::state("Remote repository is already set"));
        }
        let remote = Arc::new(remote);
        self.remote = Some(Arc::clone(&remote));
        Ok(remote)
    }

    /// Creates a bare remote inside the trash directory.
    ///
    /// # Errors
    /// Returns a state error if a remote is already set, or the git failure.
    pub fn create_local_remote(&mut self, main_branch: &str) -> Result<Arc<RemoteRepo>> {
        if self.remote.is_some() {
            return Err(HarnessError::state("Remote repository is already set"));
        }
        let root = self.trash_path.join(LOCAL_REMOTE_DIR);
        let remote = RemoteRepo::local(&root.to_string_lossy(), Some(main_branch))?;
        self.set_remote(remote)
    }

    /// # Errors
    /// Returns a state error before a remote is set.
    pub fn remote(&self) -> Result<&Arc<RemoteRepo>> {
        self.remote
            .as_ref()
            .ok_or_else(|| HarnessError::state("Remote repository is not initialized"))
    }

    /// Clones the remote for `actor` into `<trash>/<actor>`.
    ///
    /// # Errors
    /// Returns a state error without a remote or if `actor` already cloned.
    pub fn clone_repository_for(
        &mut self,
        actor: Actor,
        bundle_uri: Option<&str>,
    ) -> Result<&ClonedRepository> {
        let remote = Arc::clone(self.remote()?);
        if self.repositories.contains_key(&actor) {
            return Err(HarnessError::state(format!(
                "Repository for {actor} was already cloned"
            )));
        }
        let root = self.trash_path.join(actor.name());
        let repo = ClonedRepository::clone_from(&remote, &root, bundle_uri);
        Ok(self.repositories.entry(actor).or_insert(repo))
    }

    /// # Errors
    /// Returns a state error if `actor` has no clone.
    pub fn repo(&self, actor: Actor) -> Result<&ClonedRepository> {
        self.repositories
            .get(&actor)
            .ok_or_else(|| HarnessError::state("Cloned repository has not been initialized"))
    }

    /// Returns `actor`'s clone checked out at `branch`, cloning on first use.
    ///
    /// # Errors
    /// Fails for non-local remotes, or if clone, switch or pull fail.
    pub fn repo_at_branch(&mut self, actor: Actor, branch: &str) -> Result<&ClonedRepository> {
        if !self.remote()?.is_local() {
            return Err(HarnessError::state(
                "Remote is not initialized or does not allow pushes",
            ));
        }
        if !self.repositories.contains_key(&actor) {
            self.clone_repository_for(actor, None)?
                .clone_result()
                .expect_success("git clone failed")?;
        }

        let repo = self.repo(actor)?;
        let newest = repo.run_git(["rev-list", "--all", "-n", "1"])?;
        if newest.stdout_text().trim().is_empty() {
            let head = format!("refs/heads/{branch}");
            repo.run_git(["symbolic-ref", "HEAD", head.as_str()])?
                .expect_success("git symbolic-ref failed")?;
        } else {
            repo.run_git(["switch", branch])?
                .expect_success("git switch failed")?;
            repo.run_git(["pull", "origin", branch])?
                .expect_success("git pull failed")?;
        }
        Ok(repo)
    }

    /// Writes random content to `README.md`, commits `count` times and pushes
    /// `branch` to origin.
    ///
    /// # Errors
    /// Returns the first failing git or shell command.
    pub fn push_commits(&mut self, actor: Actor, count: usize, branch: &str) -> Result<()> {
        let repo = self.repo_at_branch(actor, branch)?;
        let redirect = format!(">{README_FILE}");
        for index in 1..=count {
            let content = random_hex(COMMIT_CONTENT_BYTES)?;
            repo.run_shell("echo", &[content.as_str(), redirect.as_str()])?
                .expect_success("writing README.md failed")?;
            repo.run_git(["add", README_FILE])?
                .expect_success("git add failed")?;
            let message = format!("test {index}");
            repo.run_git([
                "-c",
                COMMIT_USER_NAME,
                "-c",
                COMMIT_USER_EMAIL,
                "commit",
                "-m",
                message.as_str(),
            ])?
            .expect_success("git commit failed")?;
        }
        repo.run_git(["push", "origin", branch])?
            .expect_success("git push failed")?;
        info!("Pushed {count} commit(s) to {branch} as {actor}");
        Ok(())
    }

    /// Runs `<bundle server CLI> <args>` through the shell and keeps the result.
    pub fn run_cli(&mut self, args: &str) -> &CommandResult {
        let line = format!(
            "{} {args}",
            command::shell_quote(&self.bundle_server_command.to_string_lossy())
        );
        self.record_command(command::run_shell(&line, None))
    }

    /// Keeps `result` as the last command for later checks.
    pub fn record_command(&mut self, result: CommandResult) -> &CommandResult {
        self.command_result.insert(result)
    }

    /// # Errors
    /// Returns a state error if no CLI command ran yet.
    pub fn last_command(&self) -> Result<&CommandResult> {
        self.command_result
            .as_ref()
            .ok_or_else(|| HarnessError::state("No bundle server command has been run"))
    }

    /// # Errors
    /// See [`DaemonProbe::query_state`].
    pub fn daemon_state(&self) -> Result<DaemonState> {
        self.daemon.query_state()
    }

    /// Stops the daemon through the CLI if the probe reports it running.
    ///
    /// # Errors
    /// Returns the probe failure.
    pub fn ensure_daemon_stopped(&mut self) -> Result<()> {
        if self.daemon_state()? == DaemonState::Running {
            self.run_cli("web-server stop");
        }
        Ok(())
    }

    /// Starts the daemon through the CLI if the probe reports it stopped.
    ///
    /// # Errors
    /// Returns the probe failure.
    pub fn ensure_daemon_started(&mut self) -> Result<()> {
        if self.daemon_state()? == DaemonState::NotRunning {
            self.run_cli("web-server start");
        }
        Ok(())
    }

    #[must_use]
    pub fn auth_config_path(&self) -> PathBuf {
        self.trash_path.join(AUTH_CONFIG_FILE)
    }

    /// Writes a fixed-credentials auth configuration into the trash directory.
    ///
    /// # Errors
    /// Returns the write failure.
    pub fn write_auth_config(&self, username: &str, password: &str) -> Result<PathBuf> {
        let path = self.auth_config_path();
        AuthConfig::fixed(username, password).write_to(&path)?;
        Ok(path)
    }

    /// # Errors
    /// See [`WebServer::start`].
    pub async fn start_web_server(&mut self, port: u16) -> Result<Readiness> {
        self.server.start_web_server(port).await
    }

    /// Starts the web server with the auth configuration in the trash directory.
    ///
    /// # Errors
    /// See [`WebServer::start_with_auth`].
    pub async fn start_web_server_with_auth(&mut self, port: u16) -> Result<Readiness> {
        let path = self.auth_config_path();
        self.server.start_web_server_with_auth(port, &path).await
    }

    /// Runs every teardown action once, recording failures instead of stopping.
    pub fn cleanup(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        for action in TeardownAction::ORDER {
            if let Err(err) = self.run_teardown_action(action) {
                warn!("Teardown step {action:?} failed: {err}");
                report.failures.push(TeardownFailure {
                    action,
                    message: err.to_string(),
                });
            }
        }
        report
    }

    fn run_teardown_action(&mut self, action: TeardownAction) -> Result<()> {
        match action {
            TeardownAction::StopWebServer => self.server.stop_web_server(),
            TeardownAction::DeleteRoute => self.server.delete_route(),
            TeardownAction::RemoveTrash => match self.trash.take() {
                Some(trash) => trash.close().map_err(|e| {
                    HarnessError::io(
                        format!("Failed to remove {}", self.trash_path.display()),
                        e,
                    )
                }),
                None => Ok(()),
            },
        }
    }
}

impl Drop for ScenarioWorld {
    fn drop(&mut self) {
        if !self.torn_down {
            let _ = self.cleanup();
        }
    }
}
