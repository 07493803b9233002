//! Deterministic in-memory cluster.
//!
//! Used by tests, benches and `--dry-run`. Applies are keyed by identity and
//! compared by digest, so re-applying an unchanged descriptor is a no-op.
//! Workloads synthesize pods that turn Ready after a configurable number of
//! observations.

use super::{ClusterClient, ObservedObject};
use crate::errors::ClusterError;
use crate::resources::{ResourceDescriptor, ResourceId, ResourceKind, Selector};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Calls made against an [`InMemoryCluster`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterCounters {
    /// `apply` calls, including rejected ones.
    pub applies: usize,
    /// `delete` calls.
    pub deletes: usize,
    /// `get` calls.
    pub gets: usize,
}

impl ClusterCounters {
    /// Total calls of any kind.
    #[must_use]
    pub fn total(&self) -> usize {
        self.applies + self.deletes + self.gets
    }
}

#[derive(Debug, Clone)]
struct Stored {
    descriptor: ResourceDescriptor,
    digest: String,
    generation: u64,
    observations: u32,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ResourceId, Stored>,
    counters: ClusterCounters,
    fail_all: Option<ClusterError>,
    fail_writes: HashMap<ResourceKind, ClusterError>,
}

/// A cluster that lives in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    ready_after: u32,
}

impl InMemoryCluster {
    /// Creates an empty cluster where pods are Ready on first observation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pods report not-ready for the first `observations` gets after each
    /// change to their workload.
    #[must_use]
    pub fn with_ready_after(mut self, observations: u32) -> Self {
        self.ready_after = observations;
        self
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn fail_all_with(&self, error: Option<ClusterError>) {
        self.state.lock().fail_all = error;
    }

    /// Makes apply and delete of `kind` fail with `error` until cleared.
    pub fn fail_writes_of(&self, kind: ResourceKind, error: Option<ClusterError>) {
        let mut state = self.state.lock();
        match error {
            Some(e) => state.fail_writes.insert(kind, e),
            None => state.fail_writes.remove(&kind),
        };
    }

    /// Call counters since creation or the last reset.
    #[must_use]
    pub fn counters(&self) -> ClusterCounters {
        self.state.lock().counters
    }

    /// Resets call counters.
    pub fn reset_counters(&self) {
        self.state.lock().counters = ClusterCounters::default();
    }

    /// Returns true if an object with this identity exists.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.state.lock().objects.contains_key(id)
    }

    /// Generation of an object; bumps only when its payload changes.
    #[must_use]
    pub fn generation(&self, id: &ResourceId) -> Option<u64> {
        self.state.lock().objects.get(id).map(|s| s.generation)
    }

    /// The stored descriptor for an identity.
    #[must_use]
    pub fn descriptor(&self, id: &ResourceId) -> Option<ResourceDescriptor> {
        self.state.lock().objects.get(id).map(|s| s.descriptor.clone())
    }

    /// Identities of all stored objects, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ResourceId> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Number of stored objects (synthesized pods excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }

    fn check_write(state: &State, kind: ResourceKind) -> Result<(), ClusterError> {
        if let Some(e) = &state.fail_all {
            return Err(e.clone());
        }
        if let Some(e) = state.fail_writes.get(&kind) {
            return Err(e.clone());
        }
        Ok(())
    }

    fn observe_stored(&self, stored: &Stored) -> ObservedObject {
        let d = &stored.descriptor;
        let (phase, ready) = match d.kind() {
            ResourceKind::Namespace => (Some("Active".to_string()), true),
            kind if kind.is_workload() => (None, stored.observations > self.ready_after),
            _ => (None, true),
        };
        ObservedObject {
            kind: d.kind(),
            namespace: d.namespace().map(str::to_string),
            name: d.name().to_string(),
            labels: d.labels().clone(),
            phase,
            ready,
            raw: d.to_manifest(),
        }
    }

    fn pods_of(&self, stored: &Stored, observation: u32) -> Vec<ObservedObject> {
        let d = &stored.descriptor;
        let spec = &d.payload()["spec"];
        let replicas = spec["replicas"].as_u64().unwrap_or(1);
        let labels: BTreeMap<String, String> = spec["template"]["metadata"]["labels"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let ready = observation > self.ready_after;
        let phase = if ready { "Running" } else { "Pending" };

        (0..replicas)
            .map(|i| {
                let name = format!("{}-{i}", d.name());
                ObservedObject {
                    kind: ResourceKind::Pod,
                    namespace: d.namespace().map(str::to_string),
                    name: name.clone(),
                    labels: labels.clone(),
                    phase: Some(phase.to_string()),
                    ready,
                    raw: json!({
                        "metadata": { "name": name, "namespace": d.namespace(), "labels": labels },
                        "status": { "phase": phase }
                    }),
                }
            })
            .collect()
    }
}

fn selector_matches(selector: &Selector, id: &ResourceId) -> bool {
    (selector.namespace.is_none() || selector.namespace == id.namespace)
        && selector.name.as_ref().map_or(true, |n| *n == id.name)
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn apply(&self, descriptor: &ResourceDescriptor) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.counters.applies += 1;
        Self::check_write(&state, descriptor.kind())?;

        let id = descriptor.id().clone();
        if descriptor.kind() == ResourceKind::Pod {
            return Err(ClusterError::rejected(
                id.to_string(),
                "pods are managed by workloads",
            ));
        }
        if let Some(ns) = descriptor.namespace() {
            let ns_id = ResourceId {
                kind: ResourceKind::Namespace,
                namespace: None,
                name: ns.to_string(),
            };
            if !state.objects.contains_key(&ns_id) {
                return Err(ClusterError::not_found(ns_id.to_string()));
            }
        }

        let digest = descriptor.digest();
        match state.objects.get_mut(&id) {
            Some(existing) if existing.digest == digest => {
                debug!(resource = %id, "unchanged");
            }
            Some(existing) => {
                existing.descriptor = descriptor.clone();
                existing.digest = digest;
                existing.generation += 1;
                existing.observations = 0;
                debug!(resource = %id, generation = existing.generation, "configured");
            }
            None => {
                debug!(resource = %id, "created");
                state.objects.insert(
                    id,
                    Stored {
                        descriptor: descriptor.clone(),
                        digest,
                        generation: 1,
                        observations: 0,
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        ignore_missing: bool,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.counters.deletes += 1;
        Self::check_write(&state, descriptor.kind())?;

        let id = descriptor.id();
        if state.objects.remove(id).is_none() {
            return if ignore_missing {
                Ok(())
            } else {
                Err(ClusterError::not_found(id.to_string()))
            };
        }
        if descriptor.kind() == ResourceKind::Namespace {
            let ns = Some(descriptor.name().to_string());
            state.objects.retain(|k, _| k.namespace != ns);
        }
        debug!(resource = %id, "deleted");
        Ok(())
    }

    async fn get(&self, selector: &Selector) -> Result<Vec<ObservedObject>, ClusterError> {
        let mut state = self.state.lock();
        state.counters.gets += 1;
        if let Some(e) = &state.fail_all {
            return Err(e.clone());
        }

        let mut out = Vec::new();
        if selector.kind == ResourceKind::Pod {
            let workloads: Vec<ResourceId> = state
                .objects
                .keys()
                .filter(|id| id.kind.is_workload())
                .filter(|id| selector.namespace.is_none() || selector.namespace == id.namespace)
                .cloned()
                .collect();
            for id in workloads {
                let Some(stored) = state.objects.get_mut(&id) else {
                    continue;
                };
                let observation = stored.observations.saturating_add(1);
                let pods: Vec<ObservedObject> = self
                    .pods_of(stored, observation)
                    .into_iter()
                    .filter(|p| selector.name.as_ref().map_or(true, |n| *n == p.name))
                    .filter(|p| selector.labels.matches(&p.labels))
                    .collect();
                if !pods.is_empty() {
                    stored.observations = observation;
                    out.extend(pods);
                }
            }
        } else {
            for (id, stored) in &mut state.objects {
                if id.kind != selector.kind
                    || !selector_matches(selector, id)
                    || !selector.labels.matches(stored.descriptor.labels())
                {
                    continue;
                }
                if id.kind.is_workload() {
                    stored.observations = stored.observations.saturating_add(1);
                }
                out.push(self.observe_stored(stored));
            }
        }
        Ok(out)
    }
}
