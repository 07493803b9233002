//! Image build and publish with `docker`.

use super::checked;
use crate::errors::{DeployflowError, Result};
use crate::stages::{ImageArtifact, ImageRegistry};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Builds, tags and pushes with the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerRegistry {
    binary: String,
}

impl Default for DockerRegistry {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerRegistry {
    /// Uses `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a compatible binary, e.g. `podman`.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// The last non-empty line of `docker build -q` output is the image id.
fn image_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

#[async_trait]
impl ImageRegistry for DockerRegistry {
    async fn build(&self, context_dir: &Path, repository: &str) -> Result<ImageArtifact> {
        let args = vec![
            "build".to_string(),
            "-q".to_string(),
            context_dir.display().to_string(),
        ];
        let out = checked(&self.binary, &args, &[], None).await?;
        let id = image_id(&out.stdout).ok_or_else(|| {
            DeployflowError::tool("docker build", "no image id in build output")
        })?;
        info!(repository, id = %id, "image built");
        Ok(ImageArtifact {
            repository: repository.to_string(),
            id,
        })
    }

    async fn publish(&self, artifact: &ImageArtifact, tag: &str) -> Result<String> {
        let reference = format!("{}:{tag}", artifact.repository);
        checked(
            &self.binary,
            &["tag".to_string(), artifact.id.clone(), reference.clone()],
            &[],
            None,
        )
        .await?;
        checked(&self.binary, &["push".to_string(), reference.clone()], &[], None).await?;
        info!(reference = %reference, "image pushed");
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_takes_last_line() {
        assert_eq!(
            image_id("#1 building\nsha256:abc\n\n").as_deref(),
            Some("sha256:abc")
        );
        assert_eq!(image_id("  \n"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_build() {
        let registry = DockerRegistry::new().with_binary("deployflow-missing-docker");
        let err = registry.build(Path::new("."), "reg/app").await.unwrap_err();
        assert_eq!(err.kind(), "external_tool_failure");
    }
}
