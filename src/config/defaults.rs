use config::{ConfigBuilder, ConfigError, builder::DefaultState};

const DEFAULT_BUNDLE_SERVER_COMMAND: &str = "bin/git-bundle-server";
const DEFAULT_BUNDLE_WEB_SERVER_COMMAND: &str = "bin/git-bundle-web-server";
const DEFAULT_TRASH_DIRECTORY_BASE: &str = "_test/integration";
const DEFAULT_PROJECT_ROOT: &str = ".";
const DEFAULT_READINESS_TIMEOUT: &str = "2s";
const DEFAULT_READINESS_MARKER: &str = "Server is running at address";
const DEFAULT_DAEMON_LABEL: &str = "com.github.gitbundleserver";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub(crate) const SERVER_ROOT_DIR_NAME: &str = "git-bundle-server";

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("bundle_server_command", DEFAULT_BUNDLE_SERVER_COMMAND)?
        .set_default(
            "bundle_web_server_command",
            DEFAULT_BUNDLE_WEB_SERVER_COMMAND,
        )?
        .set_default("trash_directory_base", DEFAULT_TRASH_DIRECTORY_BASE)?
        .set_default("project_root", DEFAULT_PROJECT_ROOT)?
        .set_default("readiness.timeout", DEFAULT_READINESS_TIMEOUT)?
        .set_default("readiness.marker", DEFAULT_READINESS_MARKER)?
        .set_default("daemon.label", DEFAULT_DAEMON_LABEL)?
        .set_default("http.timeout_secs", DEFAULT_HTTP_TIMEOUT_SECS)
}
