use std::fmt;

use anyhow::{Result, bail, ensure};

use crate::bundle_server::reports_update_complete;
use crate::daemon_state::DaemonState;
use crate::http::{BasicAuth, fetch_bundle_list};
use crate::world::{Actor, ScenarioWorld};

const BUNDLE_DOWNLOAD_WARNING: &str = "warning: failed to download bundle from URI";

/// Observable outcomes a scenario can assert.
#[derive(Debug, Clone)]
pub enum Expectation {
    DaemonRunning,
    DaemonNotRunning,
    /// The route has a bare server repository; it is tracked for cleanup.
    RouteExists { route: String },
    /// No repository directory exists for the route.
    RouteAbsent { route: String },
    /// Repository and routes entry are gone; the route is released from cleanup.
    RouteRemoved { route: String },
    /// The tracked route appears in the routes file.
    RouteListed,
    /// The tracked route, if any, is missing from the routes file.
    RouteNotListed,
    /// The last command printed the update marker and bundles were added.
    BundlesUpdated,
    BundlesDownloadedAndUsed { actor: Actor },
    BranchTipMatches { actor: Actor, branch: String },
    LastCommandStatus { code: i32 },
    BundleListServed {
        auth: Option<BasicAuth>,
        status: u16,
    },
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::DaemonRunning => f.write_str("the daemon is running"),
            Expectation::DaemonNotRunning => f.write_str("the daemon is not running"),
            Expectation::RouteExists { route } => {
                write!(f, "a bundle server repository exists at route '{route}'")
            }
            Expectation::RouteAbsent { route } => {
                write!(f, "no bundle server repository exists at route '{route}'")
            }
            Expectation::RouteRemoved { route } => write!(
                f,
                "the route configuration and repository data at '{route}' are removed"
            ),
            Expectation::RouteListed => f.write_str("the route exists in the routes file"),
            Expectation::RouteNotListed => f.write_str("the route is removed from the routes file"),
            Expectation::BundlesUpdated => {
                f.write_str("the bundles are fetched and the bundle list is updated")
            }
            Expectation::BundlesDownloadedAndUsed { actor } => {
                write!(f, "bundles are downloaded and used by {actor}")
            }
            Expectation::BranchTipMatches { actor, branch } => {
                write!(f, "{actor}'s '{branch}' matches the remote")
            }
            Expectation::LastCommandStatus { code } => {
                write!(f, "the last command exited with {code}")
            }
            Expectation::BundleListServed { auth, status } => match auth {
                Some(auth) => write!(
                    f,
                    "the bundle list is served with status {status} to '{}'",
                    auth.username
                ),
                None => write!(f, "the bundle list is served with status {status}"),
            },
        }
    }
}

impl Expectation {
    pub(crate) async fn check(&self, world: &mut ScenarioWorld) -> Result<()> {
        match self {
            Expectation::DaemonRunning => {
                let state = world.daemon_state()?;
                ensure!(state == DaemonState::Running, "daemon is {state}");
            }
            Expectation::DaemonNotRunning => {
                let state = world.daemon_state()?;
                ensure!(state == DaemonState::NotRunning, "daemon is {state}");
            }
            Expectation::RouteExists { route } => {
                let layout = world.server().layout();
                ensure!(
                    layout.route_exists(route),
                    "no bare repository with a bundle list at {}",
                    layout.repo_root(route).display()
                );
                world.server_mut().track_route(route);
            }
            Expectation::RouteAbsent { route } => {
                let repo_root = world.server().layout().repo_root(route);
                ensure!(
                    !repo_root.exists(),
                    "repository already exists at {}",
                    repo_root.display()
                );
            }
            Expectation::RouteRemoved { route } => {
                let layout = world.server().layout();
                let repo_root = layout.repo_root(route);
                ensure!(
                    !repo_root.exists(),
                    "repository still exists at {}",
                    repo_root.display()
                );
                ensure!(
                    !layout.routes_file_lists(route)?,
                    "routes file still lists '{route}'"
                );
                if world.server().route() == Some(route.as_str()) {
                    world.server_mut().release_route();
                }
            }
            Expectation::RouteListed => {
                let server = world.server();
                let Some(route) = server.route() else {
                    bail!("Route not set");
                };
                ensure!(
                    server.layout().routes_file_lists(route)?,
                    "routes file does not list '{route}'"
                );
            }
            Expectation::RouteNotListed => {
                let server = world.server();
                if let Some(route) = server.route() {
                    ensure!(
                        !server.layout().routes_file_lists(route)?,
                        "routes file still lists '{route}'"
                    );
                }
            }
            Expectation::BundlesUpdated => {
                let stdout = world.last_command()?.stdout_text();
                ensure!(
                    reports_update_complete(&stdout),
                    "update output lacks the completion lines:\n{stdout}"
                );
                let server = world.server();
                let Some(initial) = server.initial_bundle_count() else {
                    bail!("Bundle server not initialized");
                };
                let current = server.bundle_count()?;
                ensure!(
                    current > initial,
                    "bundle count did not grow ({initial} -> {current})"
                );
            }
            Expectation::BundlesDownloadedAndUsed { actor } => {
                check_bundles_used(world, *actor)?;
            }
            Expectation::BranchTipMatches { actor, branch } => {
                let expected = world.remote()?.branch_tip_oid(branch)?;
                let tracking = format!("refs/remotes/origin/{branch}");
                let result = world.repo(*actor)?.run_git(["rev-parse", tracking.as_str()])?;
                result.expect_success("git rev-parse failed")?;
                let actual = result.stdout_text().trim().to_string();
                ensure!(
                    actual == expected,
                    "{actor} has {branch} at {actual}, remote has {expected}"
                );
            }
            Expectation::LastCommandStatus { code } => {
                world
                    .last_command()?
                    .expect_status(*code, Some("Unexpected CLI exit status"))?;
            }
            Expectation::BundleListServed { auth, status } => {
                let uri = world.server().bundle_uri()?;
                let response = fetch_bundle_list(&uri, auth.as_ref(), world.http_timeout()).await?;
                ensure!(
                    response.status == *status,
                    "GET {uri} returned {} (expected {status})",
                    response.status
                );
                if *status == 200 {
                    ensure!(response.is_populated(), "GET {uri} returned an empty body");
                }
            }
        }
        Ok(())
    }
}

fn check_bundles_used(world: &ScenarioWorld, actor: Actor) -> Result<()> {
    let repo = world.repo(actor)?;
    repo.clone_result().expect_success("git clone failed")?;

    if let Some(line) = bundle_download_warning(&repo.clone_result().stderr_text()) {
        bail!("{line}");
    }

    let expected_uri = world.server().bundle_uri()?;
    let config = repo.run_git(["config", "--get", "fetch.bundleURI"])?;
    config.expect_success("'fetch.bundleURI' is not set after clone")?;
    let actual_uri = config.stdout_text().trim().to_string();
    ensure!(
        actual_uri == expected_uri,
        "fetch.bundleURI is '{actual_uri}', expected '{expected_uri}'"
    );

    let refs = repo.run_git(["for-each-ref", "--format=%(refname)", "refs/bundles/*"])?;
    refs.expect_success("git for-each-ref failed")?;
    let count = refs
        .stdout_text()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count();
    ensure!(count > 0, "No bundle refs found in the repo");
    Ok(())
}

/// First stderr line where git gave up on downloading a bundle.
fn bundle_download_warning(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .map(str::trim_end)
        .find(|line| line.starts_with(BUNDLE_DOWNLOAD_WARNING))
}
