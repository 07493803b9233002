//! Source checkout with `git`.

use super::checked;
use crate::errors::{DeployflowError, Result};
use crate::stages::SourceRepository;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Clones with the `git` CLI, replacing any previous checkout.
#[derive(Debug, Clone)]
pub struct GitSource {
    binary: String,
}

impl Default for GitSource {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }
}

impl GitSource {
    /// Uses `git` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn clone_args(url: &str, branch: &str, dest: &Path, shallow: bool) -> Vec<String> {
        let mut args = vec!["clone".to_string()];
        if shallow {
            args.extend(["--depth".to_string(), "1".to_string()]);
        }
        args.extend([
            "--branch".to_string(),
            branch.to_string(),
            url.to_string(),
            dest.display().to_string(),
        ]);
        args
    }
}

#[async_trait]
impl SourceRepository for GitSource {
    async fn fetch(&self, url: &str, branch: &str, dest: &Path, shallow: bool) -> Result<PathBuf> {
        if tokio::fs::try_exists(dest).await? {
            tokio::fs::remove_dir_all(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = Self::clone_args(url, branch, dest, shallow);
        checked(&self.binary, &args, &[], None).await?;

        if !tokio::fs::try_exists(dest).await? {
            return Err(DeployflowError::tool(
                "git clone",
                format!("{} missing after clone", dest.display()),
            ));
        }
        info!(url, branch, dest = %dest.display(), "source checked out");
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_args() {
        let args = GitSource::clone_args("https://x/y.git", "main", Path::new("/w/src"), true);
        assert_eq!(
            args,
            vec!["clone", "--depth", "1", "--branch", "main", "https://x/y.git", "/w/src"]
        );
        let args = GitSource::clone_args("u", "dev", Path::new("d"), false);
        assert_eq!(args[1], "--branch");
    }

    #[tokio::test]
    async fn test_failed_clone_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("checkout");
        std::fs::create_dir_all(dest.join("stale")).unwrap();

        let source = GitSource::new().with_binary("deployflow-missing-git");
        let err = source.fetch("u", "main", &dest, true).await.unwrap_err();

        assert_eq!(err.kind(), "external_tool_failure");
        // The previous checkout is cleared before cloning.
        assert!(!dest.exists());
    }
}
