//! Service-manager probes for the bundle web server daemon.
//!
//! Both backends shell out to their manager and reduce its vocabulary to
//! [`DaemonState`]. Output without a state line means the service was never
//! registered and counts as not running; a state line with an unknown value
//! is an error.

use std::fmt;

use tracing::debug;

use crate::command;
use crate::error::{HarnessError, Result};

const LAUNCHCTL: &str = "launchctl";
const SYSTEMCTL: &str = "systemctl";
const LAUNCHD_STATE_PREFIX: &str = "state = ";
const SYSTEMD_ACTIVE_PREFIX: &str = "Active: ";
const NOT_STARTED: &str = "not started";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Running,
    NotRunning,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Running => f.write_str("running"),
            DaemonState::NotRunning => f.write_str("not running"),
        }
    }
}

/// Anything that can report whether the daemon is running.
pub trait DaemonProbe {
    /// # Errors
    /// Returns [`HarnessError::UnrecognizedDaemonState`] for unknown states,
    /// or a spawn error if the manager binary is missing.
    fn query_state(&self) -> Result<DaemonState>;
}

/// The two supported service managers, selected once per host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceManager {
    Launchd { label: String },
    Systemd { label: String },
}

impl ServiceManager {
    /// Picks the service manager of the current platform.
    #[must_use]
    pub fn for_host(label: impl Into<String>) -> Self {
        let label = label.into();
        if cfg!(target_os = "macos") {
            ServiceManager::Launchd { label }
        } else {
            ServiceManager::Systemd { label }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServiceManager::Launchd { .. } => "launchd",
            ServiceManager::Systemd { .. } => "systemd",
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            ServiceManager::Launchd { label } | ServiceManager::Systemd { label } => label,
        }
    }

    /// Maps raw manager output to a daemon state.
    ///
    /// # Errors
    /// Returns [`HarnessError::UnrecognizedDaemonState`] for unknown states.
    pub fn parse_state(&self, stdout: &str) -> Result<DaemonState> {
        match self {
            ServiceManager::Launchd { .. } => parse_launchd(stdout),
            ServiceManager::Systemd { .. } => parse_systemd(stdout),
        }
    }
}

impl DaemonProbe for ServiceManager {
    fn query_state(&self) -> Result<DaemonState> {
        let result = match self {
            ServiceManager::Launchd { label } => {
                let uid = nix::unistd::getuid();
                let target = format!("user/{uid}/{label}");
                command::run(LAUNCHCTL, ["print", target.as_str()], None)
            }
            ServiceManager::Systemd { label } => {
                command::run(SYSTEMCTL, ["--user", "status", label.as_str()], None)
            }
        };
        if let Some(err) = &result.error {
            return Err(HarnessError::Spawn {
                program: result.program.clone(),
                source: std::io::Error::new(err.kind(), err.to_string()),
            });
        }
        // Both managers exit non-zero for stopped or unknown services.
        debug!(
            "{} status exited with {:?}",
            self.name(),
            result.status
        );
        self.parse_state(&result.stdout_text())
    }
}

fn parse_launchd(stdout: &str) -> Result<DaemonState> {
    let state = stdout
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(LAUNCHD_STATE_PREFIX))
        .map_or(NOT_STARTED, str::trim_end);
    match state {
        "running" => Ok(DaemonState::Running),
        "not running" | NOT_STARTED => Ok(DaemonState::NotRunning),
        other => Err(HarnessError::UnrecognizedDaemonState {
            manager: "launchd",
            state: other.to_string(),
        }),
    }
}

fn parse_systemd(stdout: &str) -> Result<DaemonState> {
    let state = stdout
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(SYSTEMD_ACTIVE_PREFIX))
        .find_map(|rest| rest.split_once(" (").map(|(state, _)| state))
        .unwrap_or(NOT_STARTED);
    match state {
        "active" => Ok(DaemonState::Running),
        "inactive" | NOT_STARTED => Ok(DaemonState::NotRunning),
        other => Err(HarnessError::UnrecognizedDaemonState {
            manager: "systemd",
            state: other.to_string(),
        }),
    }
}
