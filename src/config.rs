use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

mod defaults;
mod validation;

const DEFAULT_CONFIG_PATH: &str = "harness.toml";
const ENV_PREFIX: &str = "BUNDLE_HARNESS";
const ENV_SEPARATOR: &str = "__";
const ENV_HOME: &str = "HOME";

/// Parameters shared by every scenario world in a run.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub bundle_server_command: PathBuf,
    pub bundle_web_server_command: PathBuf,
    pub trash_directory_base: PathBuf,
    pub project_root: PathBuf,
    #[serde(default)]
    pub server_root: Option<PathBuf>,
    pub readiness: ReadinessSettings,
    pub daemon: DaemonSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessSettings {
    pub timeout: String,
    pub marker: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonSettings {
    pub label: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    pub timeout_secs: u64,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file and the environment.
    ///
    /// # Errors
    /// Returns [`crate::HarnessError::Config`] if a source cannot be parsed or deserialized.
    pub fn new(config_path: Option<PathBuf>) -> crate::error::Result<Self> {
        let mut s = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        s = s.add_source(File::from(path).required(false));

        // e.g. BUNDLE_HARNESS__READINESS__TIMEOUT=5s
        s = s.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .ignore_empty(true),
        );

        Ok(s.build()?.try_deserialize()?)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is empty or out of range.
    pub fn validate(&self) -> Result<()> {
        validation::validate_settings(self)
    }

    #[must_use]
    pub fn bundle_server_command(&self) -> PathBuf {
        self.abs_path(&self.bundle_server_command)
    }

    #[must_use]
    pub fn bundle_web_server_command(&self) -> PathBuf {
        self.abs_path(&self.bundle_web_server_command)
    }

    #[must_use]
    pub fn trash_directory_base(&self) -> PathBuf {
        self.abs_path(&self.trash_directory_base)
    }

    /// Root of the bundle server's on-disk state.
    ///
    /// # Errors
    /// Returns error if no root is configured and `HOME` is unset.
    pub fn server_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.server_root {
            return Ok(self.abs_path(root));
        }
        let home = std::env::var_os(ENV_HOME)
            .ok_or_else(|| anyhow::anyhow!("server_root is not set and HOME is undefined"))?;
        Ok(PathBuf::from(home).join(defaults::SERVER_ROOT_DIR_NAME))
    }

    /// Parsed readiness timeout.
    ///
    /// # Errors
    /// Returns error if `readiness.timeout` is not a humantime duration.
    pub fn readiness_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.readiness.timeout)
            .map_err(|e| anyhow::anyhow!("readiness.timeout is invalid: {e}"))
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Resolves `path` against the project root unless it is already absolute.
    #[must_use]
    pub fn abs_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let root = if self.project_root.is_absolute() {
            self.project_root.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.project_root))
                .unwrap_or_else(|_| self.project_root.clone())
        };
        root.join(path)
    }
}
