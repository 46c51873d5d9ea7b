use anyhow::Result;

use super::Settings;

pub(crate) fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.bundle_server_command.as_os_str().is_empty() {
        anyhow::bail!("bundle_server_command must not be empty");
    }
    if settings.bundle_web_server_command.as_os_str().is_empty() {
        anyhow::bail!("bundle_web_server_command must not be empty");
    }
    if settings.trash_directory_base.as_os_str().is_empty() {
        anyhow::bail!("trash_directory_base must not be empty");
    }
    if settings.readiness.marker.trim().is_empty() {
        anyhow::bail!("readiness.marker must not be empty");
    }
    let timeout = humantime::parse_duration(&settings.readiness.timeout)
        .map_err(|e| anyhow::anyhow!("readiness.timeout is invalid: {e}"))?;
    if timeout.is_zero() {
        anyhow::bail!("readiness.timeout must be greater than 0");
    }
    if settings.daemon.label.trim().is_empty() {
        anyhow::bail!("daemon.label must not be empty");
    }
    if settings.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be greater than 0");
    }
    Ok(())
}
