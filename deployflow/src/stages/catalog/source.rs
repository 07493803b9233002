//! Source checkout and test execution.

use super::names;
use crate::context::RunContext;
use crate::errors::{DeployflowError, Result};
use crate::stages::Stage;
use async_trait::async_trait;
use tracing::info;

/// Fetches the application source into the configured workdir.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcePrepare;

#[async_trait]
impl Stage for SourcePrepare {
    fn name(&self) -> &str {
        names::SOURCE_PREPARE
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let source = &ctx.config.source;
        if source.url.trim().is_empty() {
            return Err(DeployflowError::Config("source.url is not set".into()));
        }
        let path = ctx
            .ports
            .source
            .fetch(&source.url, &source.branch, &source.workdir, source.shallow)
            .await?;
        info!(path = %path.display(), branch = %source.branch, "source ready");
        let message = format!("{}@{} at {}", source.url, source.branch, path.display());
        ctx.artifacts.set_source_dir(path);
        Ok(message)
    }
}

/// Runs the test suite in the checkout.
///
/// Outside a full install there is no fresh checkout, so the configured
/// workdir is used as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestExecution;

#[async_trait]
impl Stage for TestExecution {
    fn name(&self) -> &str {
        names::TEST_EXECUTION
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        if ctx.config.test_command.is_empty() {
            return Ok("no test command configured".to_string());
        }
        let dir = ctx.artifacts.source_dir_or(&ctx.config.source.workdir);
        ctx.ports.tests.run(&dir, &ctx.config.test_command).await
    }
}
