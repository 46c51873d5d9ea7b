use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

const WWW_DIR: &str = "www";
const GIT_DIR: &str = "git";
const ROUTES_FILE: &str = "routes";
const BUNDLE_LIST_FILE: &str = "bundle-list.json";
const HEAD_FILE: &str = "HEAD";
const DOT_GIT: &str = ".git";

/// On-disk layout of a bundle server root, read-only from the harness side.
#[derive(Debug, Clone)]
pub struct ServerLayout {
    root: PathBuf,
}

impl ServerLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn www_dir(&self) -> PathBuf {
        self.root.join(WWW_DIR)
    }

    /// Directory holding the published bundles of `route`, always under `www/`.
    #[must_use]
    pub fn bundle_dir(&self, route: &str) -> PathBuf {
        self.www_dir().join(route.trim_start_matches('/'))
    }

    /// Repository directory for `route`; absolute routes pass through unchanged.
    #[must_use]
    pub fn repo_root(&self, route: &str) -> PathBuf {
        let path = Path::new(route);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(GIT_DIR).join(route)
        }
    }

    #[must_use]
    pub fn routes_file(&self) -> PathBuf {
        self.root.join(ROUTES_FILE)
    }

    /// True when a bare server repository with a bundle list exists for `route`.
    #[must_use]
    pub fn route_exists(&self, route: &str) -> bool {
        let repo_root = self.repo_root(route);
        repo_root.exists()
            && !repo_root.join(DOT_GIT).exists()
            && repo_root.join(HEAD_FILE).exists()
            && repo_root.join(BUNDLE_LIST_FILE).exists()
    }

    /// True when the routes file mentions `route`. A missing file lists nothing.
    ///
    /// # Errors
    /// Returns error if the routes file exists but cannot be read.
    pub fn routes_file_lists(&self, route: &str) -> Result<bool> {
        let path = self.routes_file();
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.contains(route)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HarnessError::io(
                format!("Failed to read routes file {}", path.display()),
                err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_repo_root_resolves_relative_routes() {
        let layout = ServerLayout::new("/srv/bundles");
        assert_eq!(
            layout.repo_root("e2e/abc"),
            PathBuf::from("/srv/bundles/git/e2e/abc")
        );
        assert_eq!(layout.repo_root("/tmp/repo"), PathBuf::from("/tmp/repo"));
        assert_eq!(
            layout.bundle_dir("e2e/abc"),
            PathBuf::from("/srv/bundles/www/e2e/abc")
        );
    }

    #[test]
    fn test_bundle_dir_keeps_absolute_routes_under_www() {
        let layout = ServerLayout::new("/srv/bundles");
        assert_eq!(
            layout.bundle_dir("/tmp/repo"),
            PathBuf::from("/srv/bundles/www/tmp/repo")
        );
    }

    #[test]
    fn test_route_exists_requires_bare_layout() {
        let dir = tempdir().unwrap();
        let layout = ServerLayout::new(dir.path());
        let repo = layout.repo_root("owner/repo");
        fs::create_dir_all(&repo).unwrap();
        assert!(!layout.route_exists("owner/repo"));

        fs::write(repo.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(repo.join("bundle-list.json"), "{}").unwrap();
        assert!(layout.route_exists("owner/repo"));

        fs::create_dir_all(repo.join(".git")).unwrap();
        assert!(!layout.route_exists("owner/repo"));
    }

    #[test]
    fn test_routes_file_lists_route_substrings() {
        let dir = tempdir().unwrap();
        let layout = ServerLayout::new(dir.path());
        assert!(!layout.routes_file_lists("owner/repo").unwrap());

        fs::write(layout.routes_file(), "owner/repo\nother/repo\n").unwrap();
        assert!(layout.routes_file_lists("owner/repo").unwrap());
        assert!(!layout.routes_file_lists("missing/repo").unwrap());
    }
}
