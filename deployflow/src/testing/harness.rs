//! A run context wired to in-memory collaborators.

use super::{
    CountingForwarder, ScriptedScanner, StubRegistry, StubSource, StubTestRunner, StubToolchain,
};
use crate::cluster::InMemoryCluster;
use crate::config::{Credentials, DeployConfig};
use crate::context::RunContext;
use crate::events::CollectingEventSink;
use crate::stages::Ports;
use crate::verify::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Everything a stage or pipeline test needs, with handles kept for
/// assertions after the run.
///
/// Polling is shortened to a few milliseconds so unpaused tests stay fast.
#[derive(Debug)]
pub struct TestHarness {
    /// The cluster stages write to.
    pub cluster: Arc<InMemoryCluster>,
    /// Tool lookup.
    pub toolchain: Arc<StubToolchain>,
    /// Source fetching.
    pub source: Arc<StubSource>,
    /// Image build and publish.
    pub registry: Arc<StubRegistry>,
    /// Test runner.
    pub tests: Arc<StubTestRunner>,
    /// Quality scanner.
    pub scanner: Arc<ScriptedScanner>,
    /// Dashboard forwarding.
    pub forwarder: Arc<CountingForwarder>,
    /// Every event emitted by contexts built from this harness.
    pub events: Arc<CollectingEventSink>,
    /// Run configuration.
    pub config: DeployConfig,
    /// Credentials.
    pub credentials: Credentials,
    scanner_ports: bool,
}

impl TestHarness {
    /// Creates a harness with credentials present and scanning disabled.
    #[must_use]
    pub fn new() -> Self {
        let mut config = DeployConfig::default();
        config.retry = RetryPolicy::constant(3, Duration::from_millis(10));
        config.gate_retry = RetryPolicy::constant(3, Duration::from_millis(10));
        config.source.url = "https://example.com/shop.git".to_string();

        Self {
            cluster: Arc::new(InMemoryCluster::new()),
            toolchain: Arc::new(StubToolchain::new()),
            source: Arc::new(StubSource::new()),
            registry: Arc::new(StubRegistry::new()),
            tests: Arc::new(StubTestRunner::new()),
            scanner: Arc::new(ScriptedScanner::new(config.scanner.project_key.clone())),
            forwarder: Arc::new(CountingForwarder::new()),
            events: Arc::new(CollectingEventSink::new()),
            credentials: Credentials {
                scanner_token: Some("scanner-token".to_string()),
                database_password: Some("hunter2".to_string()),
            },
            config,
            scanner_ports: false,
        }
    }

    /// Enables scanning and wires the scanner and dashboard ports.
    #[must_use]
    pub fn with_scanner(mut self) -> Self {
        self.config.scanner.enabled = true;
        self.config.scanner.project_key = "shop".to_string();
        self.scanner = Arc::new(ScriptedScanner::new("shop"));
        self.scanner_ports = true;
        self
    }

    /// Replaces the cluster, e.g. one with delayed readiness.
    #[must_use]
    pub fn with_cluster(mut self, cluster: InMemoryCluster) -> Self {
        self.cluster = Arc::new(cluster);
        self
    }

    /// Edits the configuration.
    #[must_use]
    pub fn with_config(mut self, edit: impl FnOnce(&mut DeployConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// Edits the credentials.
    #[must_use]
    pub fn with_credentials(mut self, edit: impl FnOnce(&mut Credentials)) -> Self {
        edit(&mut self.credentials);
        self
    }

    /// The ports backed by this harness's stubs.
    #[must_use]
    pub fn ports(&self) -> Ports {
        let ports = Ports::new(
            self.toolchain.clone(),
            self.source.clone(),
            self.registry.clone(),
            self.tests.clone(),
        );
        if self.scanner_ports {
            ports
                .with_scanner(self.scanner.clone())
                .with_dashboard(self.forwarder.clone())
        } else {
            ports
        }
    }

    /// A fresh run context. Each call gets a new run id and artifacts.
    #[must_use]
    pub fn context(&self) -> RunContext {
        RunContext::new(
            self.config.clone(),
            self.credentials.clone(),
            self.cluster.clone(),
            self.ports(),
        )
        .with_events(self.events.clone())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
