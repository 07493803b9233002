//! Port implementations backed by real tools.
//!
//! Each adapter shells out to a command-line tool (or, for the scanner gate,
//! an HTTP API). Command failures surface as
//! [`DeployflowError::ExternalToolFailure`] carrying the tool's stderr.

mod docker;
mod git;
mod port_forward;
#[cfg(feature = "sonar")]
mod sonar;
mod test_runner;
mod toolchain;

pub use docker::DockerRegistry;
pub use git::GitSource;
pub use port_forward::KubectlPortForward;
#[cfg(feature = "sonar")]
pub use sonar::SonarScanner;
pub use test_runner::CommandTestRunner;
pub use toolchain::SystemToolchain;

use crate::errors::{DeployflowError, Result};
use crate::process::{self, CommandOutput};
use std::path::Path;

/// Runs a command and turns spawn errors and non-zero exits into tool
/// failures.
pub(crate) async fn checked(
    program: &str,
    args: &[String],
    env: &[(&str, &str)],
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let rendered = process::render(program, args);
    let output = process::run_with_env(program, args, env, None, cwd)
        .await
        .map_err(|e| DeployflowError::tool(&rendered, e.to_string()))?;
    if output.success {
        Ok(output)
    } else {
        let code = output
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        Err(DeployflowError::tool(
            rendered,
            format!("exit {code}: {}", output.diagnostic()),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checked_reports_exit_and_stderr() {
        let args = vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()];
        let err = checked("sh", &args, &[], None).await.unwrap_err();
        assert_eq!(err.kind(), "external_tool_failure");
        let text = err.to_string();
        assert!(text.contains("exit 3: nope"), "{text}");
    }

    #[tokio::test]
    async fn test_checked_missing_program() {
        let err = checked("deployflow-missing-tool", &[], &[], None).await.unwrap_err();
        assert!(err.to_string().starts_with("deployflow-missing-tool failed"));
    }
}
