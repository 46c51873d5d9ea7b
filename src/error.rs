//! Error types for harness operations.

use thiserror::Error;

/// Errors raised while driving the bundle server and its repositories.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// An operation was invoked before its precondition held.
    #[error("{0}")]
    State(String),

    /// The operating system could not create the process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited with a code other than the expected one.
    #[error(
        "{message} (expected exit code {expected}, got {}):\n\tstdout: {stdout}\n\tstderr: {stderr}",
        actual.map_or_else(|| "signal".to_string(), |code| code.to_string())
    )]
    UnexpectedStatus {
        message: String,
        expected: i32,
        actual: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The web server terminated before reporting that it was listening.
    #[error("web server exited before reporting readiness ({0})")]
    Readiness(String),

    /// A service manager reported a state outside the known vocabulary.
    #[error("{manager} daemon state '{state}' not recognized")]
    UnrecognizedDaemonState {
        manager: &'static str,
        state: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("signal delivery failed: {0}")]
    Signal(#[from] nix::Error),
}

impl HarnessError {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        HarnessError::State(message.into())
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true for errors raised because a precondition did not hold.
    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, HarnessError::State(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
