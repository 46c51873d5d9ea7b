use std::fmt::Write as _;
use std::path::Path;

use ring::digest;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

const FIXED_MODE: &str = "fixed";

/// Auth configuration read by the web server's `--auth-config` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: String,
    pub parameters: FixedCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedCredentials {
    pub username: String,
    pub password_hash: String,
}

impl AuthConfig {
    /// Single-user configuration; only the password hash is stored.
    #[must_use]
    pub fn fixed(username: &str, password: &str) -> Self {
        Self {
            mode: FIXED_MODE.to_string(),
            parameters: FixedCredentials {
                username: username.to_string(),
                password_hash: sha256_hex(password.as_bytes()),
            },
        }
    }

    /// Serializes the configuration to `path`.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string(self)?;
        std::fs::write(path, contents)
            .map_err(|e| HarnessError::io(format!("Failed to write {}", path.display()), e))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.as_ref() {
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}
