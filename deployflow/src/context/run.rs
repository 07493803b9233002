//! The context handed to every stage.

use super::RunArtifacts;
use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::cluster::ClusterClient;
use crate::config::{Credentials, DeployConfig};
use crate::errors::Result;
use crate::events::{EventSink, NoOpEventSink};
use crate::resources::{ResourceDescriptor, Selector};
use crate::stages::Ports;
use crate::verify::{Predicate, Verifier, VerifyResult};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Collaborators and settings shared by the stages of one run.
///
/// Cheap to clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    /// Target cluster.
    pub cluster: Arc<dyn ClusterClient>,
    /// Run configuration.
    pub config: Arc<DeployConfig>,
    /// Secrets resolved at load time.
    pub credentials: Arc<Credentials>,
    /// External collaborators.
    pub ports: Ports,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// Run cancellation.
    pub cancel: Arc<CancellationToken>,
    /// Scoped resources released when the run ends.
    pub cleanup: Arc<CleanupRegistry>,
    /// Values passed between stages.
    pub artifacts: Arc<RunArtifacts>,
}

impl RunContext {
    /// Creates a context with a fresh run id and empty artifacts.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        credentials: Credentials,
        cluster: Arc<dyn ClusterClient>,
        ports: Ports,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            cluster,
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            ports,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
            cleanup: Arc::new(CleanupRegistry::new()),
            artifacts: Arc::new(RunArtifacts::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the external collaborators.
    #[must_use]
    pub fn with_ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    /// Uses an externally owned cancellation token (e.g. wired to Ctrl-C).
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// A verifier using the configured retry policy and this run's events.
    #[must_use]
    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.config.retry.clone()).with_events(self.events.clone())
    }

    /// Polls until `predicate` holds for `selector`.
    pub async fn verify(&self, selector: &Selector, predicate: &Predicate) -> VerifyResult {
        self.verifier()
            .verify(self.cluster.as_ref(), selector, predicate, &self.cancel)
            .await
    }

    /// Applies descriptors in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first cluster error.
    pub async fn apply_all(&self, descriptors: &[ResourceDescriptor]) -> Result<()> {
        for descriptor in descriptors {
            self.cluster.apply(descriptor).await?;
            info!(resource = %descriptor.id(), "applied");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("namespace", &self.config.namespace)
            .field("ports", &self.ports)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
