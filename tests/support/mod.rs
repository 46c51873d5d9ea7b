// Helper functions are shared across multiple test crates; not every helper is
// referenced in each test module.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bundle_harness::Settings;
use bundle_harness::daemon_state::{DaemonProbe, DaemonState};

pub(crate) const READINESS_MARKER: &str = "Server is running at address";
pub(crate) const DAEMON_STATE_FILE: &str = "daemon-state";
pub(crate) const WEB_SERVER_ARGS_FILE: &str = "web-server-args";

/// Fake `git-bundle-server` that keeps its state under `server_root`.
pub(crate) fn write_fake_bundle_server(dir: &Path, server_root: &Path) -> Result<PathBuf> {
    let script = format!(
        r#"#!/bin/sh
set -eu
ROOT="{root}"
mkdir -p "$ROOT"

case "${{1:-}}" in
  init)
    mkdir -p "$ROOT/git/$3" "$ROOT/www/$3"
    echo "ref: refs/heads/main" > "$ROOT/git/$3/HEAD"
    echo "{{}}" > "$ROOT/git/$3/bundle-list.json"
    touch "$ROOT/www/$3/base.bundle"
    echo "$3" >> "$ROOT/routes"
    ;;
  update)
    [ -d "$ROOT/git/$2" ] || {{ echo "route $2 does not exist" >&2; exit 1; }}
    n=$(ls "$ROOT/www/$2" | wc -l | tr -d ' ')
    touch "$ROOT/www/$2/update-$n.bundle"
    echo "Updating bundle list"
    echo "Writing updated bundle list"
    echo "Update complete"
    ;;
  delete)
    rm -rf "$ROOT/git/$2" "$ROOT/www/$2"
    if [ -f "$ROOT/routes" ]; then
      grep -v -x "$2" "$ROOT/routes" > "$ROOT/routes.tmp" || true
      mv "$ROOT/routes.tmp" "$ROOT/routes"
    fi
    ;;
  web-server)
    case "${{2:-}}" in
      start) echo running > "$ROOT/{state}" ;;
      stop) echo stopped > "$ROOT/{state}" ;;
      *) exit 2 ;;
    esac
    ;;
  *)
    echo "unknown command ${{1:-}}" >&2
    exit 2
    ;;
esac
"#,
        root = server_root.display(),
        state = DAEMON_STATE_FILE,
    );
    write_executable(&dir.join("git-bundle-server"), &script)
}

/// Fake web server that records its arguments and prints the readiness marker.
pub(crate) fn write_fake_web_server(dir: &Path) -> Result<PathBuf> {
    let script = format!(
        r#"#!/bin/sh
echo "$@" > "{args}"
echo "{marker} :$2"
trap 'exit 0' INT
while :; do sleep 0.1; done
"#,
        args = dir.join(WEB_SERVER_ARGS_FILE).display(),
        marker = READINESS_MARKER,
    );
    write_executable(&dir.join("git-bundle-web-server"), &script)
}

/// Fake web server that fails before becoming ready.
pub(crate) fn write_failing_web_server(dir: &Path) -> Result<PathBuf> {
    write_executable(
        &dir.join("broken-web-server"),
        "#!/bin/sh\necho \"listen tcp :$2: address already in use\" >&2\nexit 1\n",
    )
}

fn write_executable(path: &Path, script: &str) -> Result<PathBuf> {
    fs::write(path, script).with_context(|| format!("Failed to write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Settings pointing every collaborator into `dir`.
pub(crate) fn fake_settings(dir: &Path) -> Result<Settings> {
    let server_root = dir.join("server-root");
    let cli = write_fake_bundle_server(dir, &server_root)?;
    let web = write_fake_web_server(dir)?;

    let mut settings = Settings::new(None).context("Failed to load default settings")?;
    settings.project_root = dir.to_path_buf();
    settings.bundle_server_command = cli;
    settings.bundle_web_server_command = web;
    settings.trash_directory_base = PathBuf::from("trash");
    settings.server_root = Some(server_root);
    settings.readiness.marker = READINESS_MARKER.to_string();
    settings.readiness.timeout = "2s".to_string();
    Ok(settings)
}

/// Reads the daemon state the fake CLI writes on `web-server start|stop`.
pub(crate) struct StateFileProbe {
    pub(crate) path: PathBuf,
}

impl DaemonProbe for StateFileProbe {
    fn query_state(&self) -> bundle_harness::Result<DaemonState> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim() == "running" => Ok(DaemonState::Running),
            _ => Ok(DaemonState::NotRunning),
        }
    }
}

pub(crate) fn trash_entries(settings: &Settings) -> usize {
    fs::read_dir(settings.trash_directory_base())
        .map(|entries| entries.count())
        .unwrap_or(0)
}
