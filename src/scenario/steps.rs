use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::Expectation;
use crate::remote::RemoteRepo;
use crate::world::{Actor, ScenarioWorld};

/// One scenario action. `Assert` wraps a check so it can appear anywhere.
#[derive(Debug, Clone)]
pub enum Step {
    /// Use a pre-existing repository by URL.
    RemoteRepository { url: String },
    /// Create a bare repository in the trash directory.
    NewRemoteRepository { main_branch: String },
    StartWebServer { port: u16 },
    /// Start with the auth configuration written by `WriteAuthConfig`.
    StartWebServerWithAuth { port: u16 },
    WriteAuthConfig { username: String, password: String },
    InitBundleServer {
        route_prefix: String,
        route: Option<String>,
    },
    UpdateBundleServer,
    /// `<bundle server CLI> <args>` through the shell.
    RunCli { args: String },
    CloneRemote { actor: Actor },
    CloneWithBundleUri { actor: Actor },
    PushCommits {
        actor: Actor,
        count: usize,
        branch: String,
    },
    DaemonNotStarted,
    DaemonStarted,
    Assert(Expectation),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::RemoteRepository { url } => write!(f, "a remote repository '{url}'"),
            Step::NewRemoteRepository { main_branch } => {
                write!(f, "a new remote repository with main branch '{main_branch}'")
            }
            Step::StartWebServer { port } => {
                write!(f, "the bundle web server was started at port {port}")
            }
            Step::StartWebServerWithAuth { port } => write!(
                f,
                "the bundle web server was started at port {port} with auth config"
            ),
            Step::WriteAuthConfig { username, .. } => {
                write!(f, "an auth config with username '{username}'")
            }
            Step::InitBundleServer { route_prefix, route } => match route {
                Some(route) => write!(f, "the bundle server was initialized at route '{route}'"),
                None => write!(
                    f,
                    "the bundle server was initialized under prefix '{route_prefix}'"
                ),
            },
            Step::UpdateBundleServer => f.write_str("the bundle server was updated"),
            Step::RunCli { args } => write!(f, "I run the bundle server CLI command '{args}'"),
            Step::CloneRemote { actor } => write!(f, "{actor} cloned the remote"),
            Step::CloneWithBundleUri { actor } => {
                write!(f, "{actor} cloned the remote with a bundle URI")
            }
            Step::PushCommits {
                actor,
                count,
                branch,
            } => write!(f, "{actor} pushed {count} commit(s) to '{branch}'"),
            Step::DaemonNotStarted => f.write_str("the daemon has not been started"),
            Step::DaemonStarted => f.write_str("the daemon was started"),
            Step::Assert(expectation) => write!(f, "then {expectation}"),
        }
    }
}

impl Step {
    pub(crate) async fn execute(&self, world: &mut ScenarioWorld) -> Result<()> {
        match self {
            Step::RemoteRepository { url } => {
                world.set_remote(RemoteRepo::external(url)?)?;
            }
            Step::NewRemoteRepository { main_branch } => {
                world.create_local_remote(main_branch)?;
            }
            Step::StartWebServer { port } => {
                let readiness = world.start_web_server(*port).await?;
                info!("Web server on port {port}: {readiness:?}");
            }
            Step::StartWebServerWithAuth { port } => {
                let readiness = world.start_web_server_with_auth(*port).await?;
                info!("Authenticated web server on port {port}: {readiness:?}");
            }
            Step::WriteAuthConfig { username, password } => {
                world.write_auth_config(username, password)?;
            }
            Step::InitBundleServer {
                route_prefix,
                route,
            } => {
                let remote = Arc::clone(world.remote()?);
                world
                    .server_mut()
                    .init(&remote, route_prefix, route.as_deref())?
                    .expect_success("git-bundle-server init failed")?;
            }
            Step::UpdateBundleServer => {
                let result = world.server().update()?;
                world
                    .record_command(result)
                    .expect_success("git-bundle-server update failed")?;
            }
            Step::RunCli { args } => {
                let result = world.run_cli(args);
                info!("CLI '{args}' exited with {:?}", result.status);
            }
            Step::CloneRemote { actor } => {
                world.clone_repository_for(*actor, None)?;
            }
            Step::CloneWithBundleUri { actor } => {
                let uri = world.server().bundle_uri()?;
                world.clone_repository_for(*actor, Some(&uri))?;
            }
            Step::PushCommits {
                actor,
                count,
                branch,
            } => {
                world
                    .push_commits(*actor, *count, branch)
                    .with_context(|| format!("Failed to push commits as {actor}"))?;
            }
            Step::DaemonNotStarted => world.ensure_daemon_stopped()?,
            Step::DaemonStarted => world.ensure_daemon_started()?,
            Step::Assert(expectation) => expectation.check(world).await?,
        }
        Ok(())
    }
}
