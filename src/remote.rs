use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::command;
use crate::error::{HarnessError, Result};

const FILE_SCHEME: &str = "file://";
const PACKED_REFS: &str = "packed-refs";

/// The upstream repository a scenario clones from.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    is_local: bool,
    uri: String,
    root: Option<PathBuf>,
}

impl RemoteRepo {
    /// Builds a remote from an explicit local/non-local discriminator.
    ///
    /// # Errors
    /// See [`RemoteRepo::external`] and [`RemoteRepo::local`].
    pub fn new(is_local: bool, uri_or_path: &str, main_branch: Option<&str>) -> Result<Self> {
        if is_local {
            Self::local(uri_or_path, main_branch)
        } else {
            Self::external(uri_or_path)
        }
    }

    /// Wraps a pre-existing repository reachable only through its URL.
    ///
    /// # Errors
    /// Returns [`HarnessError::InvalidArgument`] for URLs git could never clone.
    pub fn external(url: &str) -> Result<Self> {
        validate_remote_url(url)?;
        Ok(Self {
            is_local: false,
            uri: url.to_string(),
            root: None,
        })
    }

    /// Initializes a fresh bare repository at a `file://` URI or absolute path.
    ///
    /// # Errors
    /// Returns an argument error for relative paths, or the git failure.
    pub fn local(uri_or_path: &str, main_branch: Option<&str>) -> Result<Self> {
        let (uri, root) = if let Some(path) = uri_or_path.strip_prefix(FILE_SCHEME) {
            (uri_or_path.to_string(), PathBuf::from(path))
        } else if Path::new(uri_or_path).is_absolute() {
            (format!("{FILE_SCHEME}{uri_or_path}"), PathBuf::from(uri_or_path))
        } else {
            return Err(HarnessError::InvalidArgument(
                "'uri_or_path' must be a 'file://' URL or absolute path".to_string(),
            ));
        };

        command::run_git([OsStr::new("init"), OsStr::new("--bare"), root.as_os_str()])
            .expect_success("git init --bare failed")?;

        if let Some(branch) = main_branch {
            let head = format!("refs/heads/{branch}");
            command::run_git([
                OsStr::new("-C"),
                root.as_os_str(),
                OsStr::new("symbolic-ref"),
                OsStr::new("HEAD"),
                OsStr::new(&head),
            ])
            .expect_success("git symbolic-ref HEAD failed")?;
        }

        info!("Initialized bare remote at {}", root.display());
        Ok(Self {
            is_local: true,
            uri,
            root: Some(root),
        })
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Filesystem root; `None` for non-local remotes.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Reads the commit a branch points at directly from the bare repository.
    ///
    /// # Errors
    /// Fails for non-local remotes and for branches that do not exist.
    pub fn branch_tip_oid(&self, branch: &str) -> Result<String> {
        let Some(root) = self.root.as_deref().filter(|_| self.is_local) else {
            return Err(HarnessError::state(
                "Logged branch tips are only available for local custom remotes",
            ));
        };

        let ref_name = format!("refs/heads/{branch}");
        let ref_path = root.join(&ref_name);
        match std::fs::read_to_string(&ref_path) {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                packed_ref_oid(root, &ref_name)?.ok_or_else(|| {
                    HarnessError::state(format!("Branch '{branch}' does not exist on the remote"))
                })
            }
            Err(err) => Err(HarnessError::io(
                format!("Failed to read {}", ref_path.display()),
                err,
            )),
        }
    }
}

// git gc moves loose refs into packed-refs as "<oid> <refname>" lines.
fn packed_ref_oid(root: &Path, ref_name: &str) -> Result<Option<String>> {
    let path = root.join(PACKED_REFS);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(HarnessError::io(
                format!("Failed to read {}", path.display()),
                err,
            ));
        }
    };
    Ok(contents
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, name)| name.trim() == ref_name)
        .map(|(oid, _)| oid.to_string()))
}

fn validate_remote_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(HarnessError::InvalidArgument(
            "remote URL must not be empty".to_string(),
        ));
    }
    if url.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(HarnessError::InvalidArgument(format!(
            "remote URL '{url}' must not contain whitespace"
        )));
    }
    if let Some((scheme, rest)) = url.split_once("://") {
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
        if !scheme_ok || rest.is_empty() {
            return Err(HarnessError::InvalidArgument(format!(
                "remote URL '{url}' is malformed"
            )));
        }
        return Ok(());
    }
    if Path::new(url).is_absolute() || url.starts_with("./") || url.starts_with("../") {
        return Ok(());
    }
    // scp-like syntax: [user@]host:path
    match url.split_once(':') {
        Some((host, path)) if !host.is_empty() && !host.contains('/') && !path.is_empty() => {
            Ok(())
        }
        _ => Err(HarnessError::InvalidArgument(format!(
            "remote URL '{url}' is neither a URL nor an scp-style address"
        ))),
    }
}
