//! Ports - the external collaborators stages call besides the cluster.
//!
//! Each port is a narrow trait so stages only depend on the capability they
//! use, and tests can substitute stubs or mocks.

use crate::errors::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Locates command-line tools.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Returns true if `tool` is installed and runnable.
    async fn has_tool(&self, tool: &str) -> bool;
}

/// Fetches application source.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Fetches `branch` of `url` into `dest`, returning the checkout path.
    ///
    /// An existing checkout at `dest` is replaced.
    async fn fetch(&self, url: &str, branch: &str, dest: &Path, shallow: bool) -> Result<PathBuf>;
}

/// A locally built image, not yet published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Repository without tag, e.g. `localhost:5000/shop/backend`.
    pub repository: String,
    /// Local image id.
    pub id: String,
}

/// Builds and publishes container images.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Builds the image for `context_dir`.
    async fn build(&self, context_dir: &Path, repository: &str) -> Result<ImageArtifact>;

    /// Publishes `artifact` under `tag`, returning the full reference.
    async fn publish(&self, artifact: &ImageArtifact, tag: &str) -> Result<String>;
}

/// Runs the project's test suite.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs `command` in `dir`. A failing suite is an error.
    ///
    /// Returns a short summary of the run.
    async fn run(&self, dir: &Path, command: &[String]) -> Result<String>;
}

/// Handle to a submitted quality analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHandle {
    /// Project key on the scanner.
    pub project_key: String,
    /// Background task id, when the scanner reports one.
    pub task_id: Option<String>,
}

/// Verdict of a quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// The gate passed.
    Passed,
    /// The gate failed.
    Failed,
    /// Analysis still in progress.
    Pending,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        };
        f.write_str(s)
    }
}

/// Submits code for analysis and reads the gate verdict.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QualityScanner: Send + Sync {
    /// Submits `source` for analysis.
    async fn submit(&self, source: &Path, token: &str) -> Result<ReportHandle>;

    /// Reads the current gate status of a submitted analysis.
    async fn gate_status(&self, handle: &ReportHandle, token: &str) -> Result<GateStatus>;
}

/// An open forwarding connection to the scanner dashboard.
#[async_trait]
pub trait ForwardHandle: Send + Sync {
    /// Local address the dashboard is reachable at.
    fn local_address(&self) -> String;

    /// Closes the connection.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Opens a forwarding connection to the scanner dashboard.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DashboardForwarder: Send + Sync {
    /// Opens the connection.
    async fn open(&self) -> Result<Box<dyn ForwardHandle>>;
}

/// The external collaborators available to a run.
#[derive(Clone)]
pub struct Ports {
    /// Tool lookup.
    pub toolchain: Arc<dyn Toolchain>,
    /// Source fetching.
    pub source: Arc<dyn SourceRepository>,
    /// Image build and publish.
    pub registry: Arc<dyn ImageRegistry>,
    /// Test execution.
    pub tests: Arc<dyn TestRunner>,
    /// Quality scanner, when scanning is available.
    pub scanner: Option<Arc<dyn QualityScanner>>,
    /// Dashboard forwarding, when available.
    pub dashboard: Option<Arc<dyn DashboardForwarder>>,
}

impl Ports {
    /// Creates ports without scanner support.
    #[must_use]
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        source: Arc<dyn SourceRepository>,
        registry: Arc<dyn ImageRegistry>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            toolchain,
            source,
            registry,
            tests,
            scanner: None,
            dashboard: None,
        }
    }

    /// Adds a quality scanner.
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<dyn QualityScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Adds a dashboard forwarder.
    #[must_use]
    pub fn with_dashboard(mut self, dashboard: Arc<dyn DashboardForwarder>) -> Self {
        self.dashboard = Some(dashboard);
        self
    }
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ports")
            .field("has_scanner", &self.scanner.is_some())
            .field("has_dashboard", &self.dashboard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_status_display_and_serde() {
        assert_eq!(GateStatus::Pending.to_string(), "pending");
        assert_eq!(serde_json::to_string(&GateStatus::Passed).unwrap(), "\"passed\"");
    }

    #[tokio::test]
    async fn test_ports_debug_and_builders() {
        let mut scanner = MockQualityScanner::new();
        scanner.expect_submit().never();

        let ports = Ports::new(
            Arc::new(MockToolchain::new()),
            Arc::new(MockSourceRepository::new()),
            Arc::new(MockImageRegistry::new()),
            Arc::new(MockTestRunner::new()),
        );
        assert!(format!("{ports:?}").contains("has_scanner: false"));

        let ports = ports.with_scanner(Arc::new(scanner));
        assert!(ports.scanner.is_some());
        assert!(ports.dashboard.is_none());
    }
}
