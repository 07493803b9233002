//! Cluster client abstraction.
//!
//! The engine talks to the control plane only through [`ClusterClient`]:
//! apply, delete and get. Waiting for a condition is built on top of `get`
//! by [`crate::verify::Verifier`], see [`wait_for_condition`].

mod kubectl;
mod memory;

pub use kubectl::{classify_error, observe, KubectlClient, Operation};
pub use memory::{ClusterCounters, InMemoryCluster};

use crate::cancellation::CancellationToken;
use crate::errors::ClusterError;
use crate::resources::{ResourceDescriptor, ResourceId, ResourceKind, Selector};
use crate::verify::{Predicate, RetryPolicy, Verifier, VerifyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A cluster object as last observed by a `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedObject {
    /// Object kind.
    pub kind: ResourceKind,
    /// Namespace, if namespaced.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
    /// Labels on the object.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Reported phase (`Running`, `Pending`, `Active`, ...).
    pub phase: Option<String>,
    /// Whether the object counts as Ready/Running.
    pub ready: bool,
    /// Raw object as returned by the control plane.
    #[serde(default)]
    pub raw: Value,
}

impl ObservedObject {
    /// Identity of the observed object.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Narrow capability interface to a cluster control plane.
///
/// Implementations must make `apply` idempotent: the same descriptor applied
/// twice leaves one object and no additional side effect, and a changed
/// payload for an existing identity updates the object in place.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Creates or updates the object described by `descriptor`.
    async fn apply(&self, descriptor: &ResourceDescriptor) -> Result<(), ClusterError>;

    /// Deletes the object. `NotFound` becomes success when `ignore_missing`.
    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        ignore_missing: bool,
    ) -> Result<(), ClusterError>;

    /// Lists objects matching `selector`. Read-only.
    async fn get(&self, selector: &Selector) -> Result<Vec<ObservedObject>, ClusterError>;
}

/// Waits until `predicate` holds for the objects matching `selector`.
///
/// Never raises: exhaustion returns `converged = false`.
pub async fn wait_for_condition<C>(
    client: &C,
    selector: &Selector,
    predicate: &Predicate,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> VerifyResult
where
    C: ClusterClient + ?Sized,
{
    Verifier::new(policy.clone())
        .verify(client, selector, predicate, cancel)
        .await
}
