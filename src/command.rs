use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{HarnessError, Result};

const SHELL: &str = "sh";
const GIT: &str = "git";

/// Captured outcome of a synchronous subprocess invocation.
///
/// A spawn failure is recorded in `error` instead of being raised, so callers
/// that only want to inspect the outcome (clones, CLI probes) never have to
/// handle it eagerly.
#[derive(Debug)]
pub struct CommandResult {
    pub program: String,
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub error: Option<io::Error>,
}

impl CommandResult {
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none() && self.status == Some(0)
    }

    /// Checks the exit status against `expected`.
    ///
    /// # Errors
    /// Re-raises a captured spawn error, or returns
    /// [`HarnessError::UnexpectedStatus`] with stdout/stderr attached.
    pub fn expect_status(&self, expected: i32, message: Option<&str>) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(HarnessError::Spawn {
                program: self.program.clone(),
                source: io::Error::new(err.kind(), err.to_string()),
            });
        }
        if self.status == Some(expected) {
            return Ok(());
        }
        Err(HarnessError::UnexpectedStatus {
            message: message.unwrap_or("Invalid status code").to_string(),
            expected,
            actual: self.status,
            stdout: self.stdout_text(),
            stderr: self.stderr_text(),
        })
    }

    /// Shorthand for `expect_status(0, message)`.
    ///
    /// # Errors
    /// See [`CommandResult::expect_status`].
    pub fn expect_success(&self, message: &str) -> Result<()> {
        self.expect_status(0, Some(message))
    }
}

/// Runs `program` with `args`, optionally inside `cwd`, and captures the outcome.
pub fn run<I, S>(program: &str, args: I, cwd: Option<&Path>) -> CommandResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let output = command.output();
    let elapsed = started.elapsed();

    let result = match output {
        Ok(output) => CommandResult {
            program: program.to_string(),
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
            error: None,
        },
        Err(err) => CommandResult {
            program: program.to_string(),
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            elapsed,
            error: Some(err),
        },
    };
    debug!(
        "Ran {program} (status={:?}, elapsed={:?})",
        result.status, result.elapsed
    );
    result
}

/// Runs `git` with the given arguments in the current directory.
pub fn run_git<I, S>(args: I) -> CommandResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run(GIT, args, None)
}

/// Runs `command` through `sh -c`, so redirections and globs work.
pub fn run_shell(command: &str, cwd: Option<&Path>) -> CommandResult {
    run(SHELL, ["-c", command], cwd)
}

/// Runs `program` and fails unless it exits with `expected`.
///
/// # Errors
/// Returns a spawn error or [`HarnessError::UnexpectedStatus`].
pub fn run_checked<I, S>(program: &str, args: I, expected: i32) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let result = run(program, args, None);
    result.expect_status(expected, None)?;
    Ok(result)
}

/// Quotes `value` for safe interpolation into a `sh -c` command line.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
