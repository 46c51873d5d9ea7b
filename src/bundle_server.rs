use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{info, warn};

use crate::command::{self, CommandResult};
use crate::error::{HarnessError, Result};
use crate::layout::ServerLayout;
use crate::remote::RemoteRepo;
use crate::web_server::{Readiness, WebServer};

const BUNDLE_EXTENSION: &str = ".bundle";
const ROUTE_SUFFIX_BYTES: usize = 8;

/// Lines the CLI prints, in order, after a successful `update`.
pub const UPDATE_COMPLETE_MARKER: &str =
    "Updating bundle list\nWriting updated bundle list\nUpdate complete";

/// Drives the bundle server CLI for one route and owns the web server process.
#[derive(Debug)]
pub struct BundleServer {
    command: PathBuf,
    layout: ServerLayout,
    web_server: WebServer,
    route: Option<String>,
    initial_bundle_count: Option<usize>,
}

impl BundleServer {
    #[must_use]
    pub fn new(command: impl Into<PathBuf>, layout: ServerLayout, web_server: WebServer) -> Self {
        Self {
            command: command.into(),
            layout,
            web_server,
            route: None,
            initial_bundle_count: None,
        }
    }

    #[must_use]
    pub fn command(&self) -> &Path {
        &self.command
    }

    #[must_use]
    pub fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Bundle count snapshotted right after `init`.
    #[must_use]
    pub fn initial_bundle_count(&self) -> Option<usize> {
        self.initial_bundle_count
    }

    #[must_use]
    pub fn web_server(&self) -> &WebServer {
        &self.web_server
    }

    /// Starts the web server; see [`WebServer::start`].
    ///
    /// # Errors
    /// Propagates the web server start failure.
    pub async fn start_web_server(&mut self, port: u16) -> Result<Readiness> {
        self.web_server.start(port).await
    }

    /// Starts the web server with an auth configuration file.
    ///
    /// # Errors
    /// Propagates the web server start failure.
    pub async fn start_web_server_with_auth(
        &mut self,
        port: u16,
        auth_config: &Path,
    ) -> Result<Readiness> {
        self.web_server.start_with_auth(port, auth_config).await
    }

    /// Stops the web server if one is running.
    ///
    /// # Errors
    /// Returns the signal delivery failure.
    pub fn stop_web_server(&mut self) -> Result<()> {
        self.web_server.stop()
    }

    /// Registers `remote` with the server under an explicit or generated route.
    ///
    /// A generated route is `<route_prefix>/<16 hex chars>`.
    ///
    /// # Errors
    /// Fails if a repository already exists at the route, or if the bundle
    /// count cannot be read after a successful `init`.
    pub fn init(
        &mut self,
        remote: &RemoteRepo,
        route_prefix: &str,
        route: Option<&str>,
    ) -> Result<CommandResult> {
        let route = match route {
            Some(route) if !route.is_empty() => route.to_string(),
            _ => generate_route(route_prefix)?,
        };

        let repo_root = self.layout.repo_root(&route);
        if repo_root.exists() {
            return Err(HarnessError::state(format!(
                "Bundle server repository already exists at {}",
                repo_root.display()
            )));
        }
        self.route = Some(route.clone());

        let result = self.run_cli(["init", remote.uri(), route.as_str()]);
        if result.success() {
            self.initial_bundle_count = Some(self.bundle_count()?);
            info!(
                "Initialized route {route} with {:?} bundle(s)",
                self.initial_bundle_count
            );
        } else {
            warn!("Bundle server init for route {route} did not succeed");
        }
        Ok(result)
    }

    /// Fetches the latest history for the route and regenerates bundles.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn update(&self) -> Result<CommandResult> {
        let route = self
            .route
            .as_deref()
            .ok_or_else(|| HarnessError::state("Tried to update server before running 'init'"))?;
        Ok(self.run_cli(["update", route]))
    }

    /// Counts `*.bundle` files published for the route.
    ///
    /// # Errors
    /// Returns a state error without a route, or the directory read failure.
    pub fn bundle_count(&self) -> Result<usize> {
        let route = self
            .route
            .as_deref()
            .ok_or_else(|| HarnessError::state("Route is not defined"))?;
        let dir = self.layout.bundle_dir(route);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| HarnessError::io(format!("Failed to read {}", dir.display()), e))?;

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| {
                HarnessError::io(format!("Failed to read entry in {}", dir.display()), e)
            })?;
            if entry
                .file_name()
                .to_string_lossy()
                .ends_with(BUNDLE_EXTENSION)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// `<base>/<route>`, the URI clients pass as `--bundle-uri`.
    ///
    /// # Errors
    /// Returns a state error before the web server started or before `init`.
    pub fn bundle_uri(&self) -> Result<String> {
        let base = self.web_server.base_uri().ok_or_else(|| {
            HarnessError::state("Tried to get bundle URI before starting the web server")
        })?;
        let route = self
            .route
            .as_deref()
            .ok_or_else(|| HarnessError::state("Tried to get bundle URI before running 'init'"))?;
        Ok(format!("{base}/{route}"))
    }

    /// Takes ownership of a route created outside `init`, so cleanup deletes it.
    pub fn track_route(&mut self, route: &str) {
        self.route = Some(route.to_string());
    }

    /// Forgets the route so cleanup leaves it alone.
    pub fn release_route(&mut self) -> Option<String> {
        self.initial_bundle_count = None;
        self.route.take()
    }

    /// Deletes the tracked route through the CLI; a no-op without one.
    ///
    /// # Errors
    /// Returns the spawn failure or unexpected exit status of `delete`.
    pub fn delete_route(&mut self) -> Result<()> {
        let Some(route) = self.route.take() else {
            return Ok(());
        };
        let result = self.run_cli(["delete", route.as_str()]);
        result.expect_success(&format!("Failed to delete route {route}"))?;
        info!("Deleted route {route}");
        Ok(())
    }

    fn run_cli<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> CommandResult {
        command::run(&self.command.to_string_lossy(), args, None)
    }
}

/// True when `stdout` carries the update success lines in order.
#[must_use]
pub fn reports_update_complete(stdout: &str) -> bool {
    stdout.contains(UPDATE_COMPLETE_MARKER)
}

fn generate_route(prefix: &str) -> Result<String> {
    Ok(format!("{prefix}/{}", random_hex(ROUTE_SUFFIX_BYTES)?))
}

/// Lowercase hex of `len` random bytes.
pub(crate) fn random_hex(len: usize) -> Result<String> {
    let mut buffer = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buffer)
        .map_err(|_| HarnessError::state("Failed to gather random bytes"))?;
    let mut output = String::with_capacity(len * 2);
    for byte in buffer {
        let _ = write!(&mut output, "{byte:02x}");
    }
    Ok(output)
}
