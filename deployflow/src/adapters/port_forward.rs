//! Dashboard forwarding with `kubectl port-forward`.

use crate::cluster::KubectlClient;
use crate::config::DeployConfig;
use crate::errors::{DeployflowError, Result};
use crate::resources::manifests::SCANNER_NAME;
use crate::stages::{DashboardForwarder, ForwardHandle};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Forwards a local port to the scanner service.
#[derive(Debug, Clone)]
pub struct KubectlPortForward {
    binary: String,
    base_args: Vec<String>,
    namespace: String,
    service: String,
    local_port: u16,
    remote_port: u16,
}

impl KubectlPortForward {
    /// Forwards to the scanner service described by `config`.
    #[must_use]
    pub fn new(kubectl: &KubectlClient, config: &DeployConfig) -> Self {
        Self {
            binary: kubectl.binary().to_string(),
            base_args: kubectl.base_args(),
            namespace: config.namespace.clone(),
            service: SCANNER_NAME.to_string(),
            local_port: config.scanner.local_port,
            remote_port: config.scanner.port,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            format!("svc/{}", self.service),
            format!("{}:{}", self.local_port, self.remote_port),
        ]);
        args
    }
}

/// A running `kubectl port-forward`. Dropping it kills the child.
struct PortForwardHandle {
    child: Child,
    address: String,
}

#[async_trait]
impl ForwardHandle for PortForwardHandle {
    fn local_address(&self) -> String {
        self.address.clone()
    }

    async fn release(mut self: Box<Self>) -> Result<()> {
        match self.child.try_wait()? {
            Some(status) => debug!(%status, "port-forward already exited"),
            None => {
                self.child.kill().await?;
                debug!(address = %self.address, "port-forward stopped");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardForwarder for KubectlPortForward {
    async fn open(&self) -> Result<Box<dyn ForwardHandle>> {
        let args = self.args();
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeployflowError::tool("kubectl port-forward", e.to_string()))?;

        let address = format!("http://127.0.0.1:{}", self.local_port);
        info!(address = %address, service = %self.service, "dashboard forwarded");
        Ok(Box::new(PortForwardHandle { child, address }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward() -> KubectlPortForward {
        let kubectl = KubectlClient::new().with_context("kind-dev");
        KubectlPortForward::new(&kubectl, &DeployConfig::default())
    }

    #[test]
    fn test_args() {
        let args = forward().args();
        assert_eq!(&args[..2], ["--context", "kind-dev"]);
        assert!(args.contains(&"svc/sonarqube".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("9000:9000"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let kubectl = KubectlClient::new().with_binary("deployflow-missing-kubectl");
        let forward = KubectlPortForward::new(&kubectl, &DeployConfig::default());
        assert_eq!(forward.binary, "deployflow-missing-kubectl");

        let result = forward.open().await;
        assert_eq!(result.err().map(|e| e.kind()), Some("external_tool_failure"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_kills_child() {
        let forward = KubectlPortForward {
            binary: "sleep".to_string(),
            base_args: Vec::new(),
            namespace: String::new(),
            service: String::new(),
            local_port: 1,
            remote_port: 1,
        };
        // `sleep` rejects the extra arguments and exits; release must cope either way.
        let handle = forward.open().await.unwrap();
        assert_eq!(handle.local_address(), "http://127.0.0.1:1");
        handle.release().await.unwrap();
    }
}
