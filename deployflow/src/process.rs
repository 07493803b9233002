//! Running external commands.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stderr, or stdout when stderr is empty, trimmed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// `program arg1 arg2`, for messages.
pub(crate) fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Runs `program` to completion, optionally feeding `stdin`.
///
/// A non-zero exit is not an error here; callers classify it.
pub(crate) async fn run(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
    cwd: Option<&Path>,
) -> std::io::Result<CommandOutput> {
    run_with_env(program, args, &[], stdin, cwd).await
}

/// Like [`run`], with extra environment variables. Values are never logged.
pub(crate) async fn run_with_env(
    program: &str,
    args: &[String],
    env: &[(&str, &str)],
    stdin: Option<&[u8]>,
    cwd: Option<&Path>,
) -> std::io::Result<CommandOutput> {
    debug!(command = %render(program, args), "running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env.iter().copied())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        // Close stdin so the child sees EOF.
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(render("kubectl", &[]), "kubectl");
        assert_eq!(
            render("docker", &["push".into(), "reg/app:1".into()]),
            "docker push reg/app:1"
        );
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            success: false,
            code: Some(1),
            stdout: "partial\n".into(),
            stderr: "  boom \n".into(),
        };
        assert_eq!(out.diagnostic(), "boom");

        let out = CommandOutput {
            stderr: String::new(),
            ..out
        };
        assert_eq!(out.diagnostic(), "partial");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let out = run("cat", &[], Some(b"hello"), None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "echo $DEPLOYFLOW_PROBE; pwd".to_string()];
        let out = run_with_env("sh", &args, &[("DEPLOYFLOW_PROBE", "on")], None, Some(dir.path()))
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.stdout.starts_with("on\n"));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let err = run("deployflow-definitely-missing", &[], None, None).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
