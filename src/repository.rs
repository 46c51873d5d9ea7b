use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::command::{self, CommandResult};
use crate::error::{HarnessError, Result};
use crate::remote::RemoteRepo;

const GIT: &str = "git";

/// A working clone created by a scenario actor.
///
/// The clone runs once, synchronously, at construction. Its outcome is kept in
/// `clone_result` rather than raised; only a spawn-level failure leaves the
/// repository uninitialized.
#[derive(Debug)]
pub struct ClonedRepository {
    root: PathBuf,
    remote: Arc<RemoteRepo>,
    clone_result: CommandResult,
    initialized: bool,
}

impl ClonedRepository {
    /// Clones `remote` into `root`, optionally passing `--bundle-uri`.
    pub fn clone_from(remote: &Arc<RemoteRepo>, root: &Path, bundle_uri: Option<&str>) -> Self {
        let args = clone_args(remote.uri(), root, bundle_uri);
        let clone_result = command::run(GIT, &args, None);
        let initialized = clone_result.error.is_none();

        if initialized {
            info!(
                "Cloned {} into {} (status={:?}, elapsed={:?})",
                remote.uri(),
                root.display(),
                clone_result.status,
                clone_result.elapsed
            );
        } else {
            warn!(
                "Failed to spawn git clone for {}: {:?}",
                root.display(),
                clone_result.error
            );
        }

        Self {
            root: root.to_path_buf(),
            remote: Arc::clone(remote),
            clone_result,
            initialized,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn remote(&self) -> &RemoteRepo {
        &self.remote
    }

    #[must_use]
    pub fn clone_result(&self) -> &CommandResult {
        &self.clone_result
    }

    #[must_use]
    pub fn clone_elapsed(&self) -> Duration {
        self.clone_result.elapsed
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Runs `git -C <root> <args>`.
    ///
    /// # Errors
    /// Returns a state error if the clone never produced a repository.
    pub fn run_git<I, S>(&self, args: I) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.ensure_initialized()?;
        let mut full: Vec<OsString> = vec!["-C".into(), self.root.clone().into_os_string()];
        full.extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        Ok(command::run(GIT, full, None))
    }

    /// Runs `command args...` through the shell with the repository as working directory.
    ///
    /// # Errors
    /// Returns a state error if the clone never produced a repository.
    pub fn run_shell(&self, command: &str, args: &[&str]) -> Result<CommandResult> {
        self.ensure_initialized()?;
        let line = std::iter::once(command)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(command::run_shell(&line, Some(&self.root)))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(HarnessError::state("Repository is not initialized"))
        }
    }
}

fn clone_args(remote_uri: &str, root: &Path, bundle_uri: Option<&str>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["clone".into()];
    if let Some(uri) = bundle_uri {
        args.push(format!("--bundle-uri={uri}").into());
    }
    args.push(remote_uri.into());
    args.push(root.as_os_str().to_os_string());
    args
}
