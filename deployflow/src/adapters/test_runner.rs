//! Test suite execution.

use super::checked;
use crate::errors::{DeployflowError, Result};
use crate::stages::TestRunner;
use async_trait::async_trait;
use std::path::Path;

/// Runs the configured command in the checkout.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandTestRunner;

impl CommandTestRunner {
    /// Creates the runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, dir: &Path, command: &[String]) -> Result<String> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DeployflowError::Config("test command is empty".to_string()))?;
        let out = checked(program, args, &[], Some(dir)).await?;
        let summary = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("tests passed")
            .to_string();
        Ok(summary)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn command(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_passing_suite_summarised() {
        let dir = tempfile::tempdir().unwrap();
        let summary = CommandTestRunner
            .run(dir.path(), &command("echo running; echo '12 passed'"))
            .await
            .unwrap();
        assert_eq!(summary, "12 passed");
    }

    #[tokio::test]
    async fn test_failing_suite_and_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommandTestRunner
            .run(dir.path(), &command("echo '1 failed' >&2; exit 1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 failed"));

        let err = CommandTestRunner.run(dir.path(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
