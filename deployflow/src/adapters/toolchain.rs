//! Tool lookup on `PATH`.

use crate::process;
use crate::stages::Toolchain;
use async_trait::async_trait;
use tracing::debug;

/// Finds tools with `which`.
#[derive(Debug, Clone, Default)]
pub struct SystemToolchain;

impl SystemToolchain {
    /// Creates the toolchain.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Toolchain for SystemToolchain {
    async fn has_tool(&self, tool: &str) -> bool {
        match process::run("which", &[tool.to_string()], None, None).await {
            Ok(out) => out.success,
            Err(e) => {
                debug!(tool, error = %e, "which unavailable");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finds_shell_not_nonsense() {
        let tools = SystemToolchain::new();
        assert!(tools.has_tool("sh").await);
        assert!(!tools.has_tool("deployflow-no-such-tool").await);
    }
}
