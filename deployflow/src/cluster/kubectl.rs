//! Cluster client backed by the `kubectl` binary.

use super::{ClusterClient, ObservedObject};
use crate::errors::ClusterError;
use crate::process;
use crate::resources::{ResourceDescriptor, ResourceKind, Selector};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Which client operation produced an error. Unknown failures are
/// classified differently for writes and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `apply` or `delete`.
    Write,
    /// `get`.
    Read,
}

/// Talks to a cluster through `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
            kubeconfig: None,
        }
    }
}

impl KubectlClient {
    /// Uses `kubectl` from `PATH` with the current context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Passes `--context`.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Passes `--kubeconfig`.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub(crate) fn binary(&self) -> &str {
        &self.binary
    }

    pub(crate) fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ctx) = &self.context {
            args.push("--context".to_string());
            args.push(ctx.clone());
        }
        if let Some(cfg) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(cfg.display().to_string());
        }
        args
    }

    async fn kubectl(
        &self,
        args: Vec<String>,
        stdin: Option<&[u8]>,
        resource: &str,
        op: Operation,
    ) -> Result<String, ClusterError> {
        let mut full = self.base_args();
        full.extend(args);
        let output = process::run(&self.binary, &full, stdin, None)
            .await
            .map_err(|e| ClusterError::Unreachable(format!("cannot run {}: {e}", self.binary)))?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_error(&output.diagnostic(), resource, op))
        }
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    #[instrument(skip(self, descriptor), fields(resource = %descriptor.id()))]
    async fn apply(&self, descriptor: &ResourceDescriptor) -> Result<(), ClusterError> {
        let manifest = serde_json::to_vec(&descriptor.to_manifest())
            .map_err(|e| ClusterError::rejected(descriptor.id().to_string(), e.to_string()))?;
        let out = self
            .kubectl(
                vec!["apply".into(), "-f".into(), "-".into()],
                Some(&manifest),
                &descriptor.id().to_string(),
                Operation::Write,
            )
            .await?;
        debug!(output = out.trim(), "applied");
        Ok(())
    }

    #[instrument(skip(self, descriptor), fields(resource = %descriptor.id()))]
    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        ignore_missing: bool,
    ) -> Result<(), ClusterError> {
        let mut args = vec![
            "delete".to_string(),
            descriptor.kind().resource().to_string(),
            descriptor.name().to_string(),
        ];
        if let Some(ns) = descriptor.namespace() {
            args.push("-n".into());
            args.push(ns.to_string());
        }
        if ignore_missing {
            args.push("--ignore-not-found".into());
        }
        match self
            .kubectl(args, None, &descriptor.id().to_string(), Operation::Write)
            .await
        {
            Err(e) if ignore_missing && e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self, selector), fields(selector = %selector.describe()))]
    async fn get(&self, selector: &Selector) -> Result<Vec<ObservedObject>, ClusterError> {
        let mut args = vec!["get".to_string(), selector.kind.resource().to_string()];
        if let Some(name) = &selector.name {
            args.push(name.clone());
        }
        if let Some(ns) = &selector.namespace {
            args.push("-n".into());
            args.push(ns.clone());
        }
        if !selector.labels.is_empty() {
            args.push("-l".into());
            args.push(selector.labels.to_string());
        }
        args.push("-o".into());
        args.push("json".into());

        let stdout = match self
            .kubectl(args, None, &selector.describe(), Operation::Read)
            .await
        {
            // A named get of a missing object is an empty observation.
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            other => other?,
        };

        let body: Value = serde_json::from_str(&stdout)
            .map_err(|e| ClusterError::Unreachable(format!("unparseable kubectl output: {e}")))?;
        let items = match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![body],
        };
        Ok(items
            .iter()
            .filter_map(|item| observe(selector.kind, item))
            .filter(|o| selector.labels.matches(&o.labels))
            .collect())
    }
}

/// Maps kubectl stderr to a [`ClusterError`].
#[must_use]
pub fn classify_error(stderr: &str, resource: &str, op: Operation) -> ClusterError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("notfound") || lower.contains("not found") {
        ClusterError::not_found(resource)
    } else if lower.contains("forbidden") || lower.contains("unauthorized") {
        ClusterError::PermissionDenied(message)
    } else if [
        "unable to connect",
        "connection refused",
        "dial tcp",
        "i/o timeout",
        "no such host",
        "tls handshake timeout",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        ClusterError::Unreachable(message)
    } else if lower.contains("invalid") || lower.contains("error validating") {
        ClusterError::rejected(resource, message)
    } else {
        match op {
            Operation::Write => ClusterError::rejected(resource, message),
            Operation::Read => ClusterError::Unreachable(message),
        }
    }
}

fn as_i64(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or(0)
}

/// Builds an [`ObservedObject`] from one object as returned by `kubectl get`.
///
/// Returns `None` when the object has no name.
#[must_use]
pub fn observe(kind: ResourceKind, item: &Value) -> Option<ObservedObject> {
    let metadata = item.get("metadata")?;
    let name = metadata.get("name")?.as_str()?.to_string();
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .map(str::to_string);
    let labels: BTreeMap<String, String> = metadata
        .get("labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let status = item.get("status");
    let phase = status
        .and_then(|s| s.get("phase"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let ready = match kind {
        ResourceKind::Pod => {
            let condition_ready = status
                .and_then(|s| s.get("conditions"))
                .and_then(Value::as_array)
                .is_some_and(|conds| {
                    conds.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                });
            match phase.as_deref() {
                Some("Succeeded") => true,
                Some("Running") => condition_ready,
                _ => false,
            }
        }
        ResourceKind::Deployment | ResourceKind::StatefulSet => {
            let desired = item
                .get("spec")
                .and_then(|s| s.get("replicas"))
                .and_then(Value::as_i64)
                .unwrap_or(1);
            as_i64(status.and_then(|s| s.get("readyReplicas"))) >= desired
        }
        ResourceKind::Namespace => phase.as_deref() == Some("Active"),
        _ => true,
    };

    Some(ObservedObject {
        kind,
        namespace,
        name,
        labels,
        phase,
        ready,
        raw: item.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_not_found() {
        let err = classify_error(
            "Error from server (NotFound): namespaces \"shop\" not found",
            "namespace/-/shop",
            Operation::Write,
        );
        assert_eq!(err, ClusterError::not_found("namespace/-/shop"));
    }

    #[test]
    fn test_classify_forbidden() {
        let err = classify_error(
            "Error from server (Forbidden): deployments.apps is forbidden: User \"ci\" cannot create",
            "deployment/shop/backend",
            Operation::Write,
        );
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn test_classify_unreachable() {
        let err = classify_error(
            "The connection to the server localhost:6443 was refused - did you specify the right host or port?\nUnable to connect to the server: dial tcp 127.0.0.1:6443: connect: connection refused",
            "pod",
            Operation::Read,
        );
        assert_eq!(err.kind(), "unreachable");
    }

    #[test]
    fn test_classify_invalid_and_unknown() {
        let err = classify_error(
            "The Deployment \"backend\" is invalid: spec.replicas: Invalid value: -1",
            "deployment/shop/backend",
            Operation::Write,
        );
        assert_eq!(err.kind(), "rejected_spec");

        assert_eq!(classify_error("weird", "x", Operation::Write).kind(), "rejected_spec");
        assert_eq!(classify_error("weird", "x", Operation::Read).kind(), "unreachable");
    }

    #[test]
    fn test_observe_pod_readiness() {
        let running = json!({
            "metadata": {
                "name": "backend-1",
                "namespace": "shop",
                "labels": {"app.kubernetes.io/name": "backend"}
            },
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        });
        let obs = observe(ResourceKind::Pod, &running).unwrap();
        assert!(obs.ready);
        assert_eq!(obs.namespace.as_deref(), Some("shop"));
        assert_eq!(obs.labels["app.kubernetes.io/name"], "backend");

        let starting = json!({
            "metadata": {"name": "backend-2"},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "False"}]}
        });
        assert!(!observe(ResourceKind::Pod, &starting).unwrap().ready);

        let pending = json!({"metadata": {"name": "backend-3"}, "status": {"phase": "Pending"}});
        assert!(!observe(ResourceKind::Pod, &pending).unwrap().ready);
    }

    #[test]
    fn test_observe_workload_replicas() {
        let partial = json!({
            "metadata": {"name": "backend"},
            "spec": {"replicas": 2},
            "status": {"readyReplicas": 1}
        });
        assert!(!observe(ResourceKind::Deployment, &partial).unwrap().ready);

        let full = json!({
            "metadata": {"name": "postgres"},
            "spec": {"replicas": 1},
            "status": {"readyReplicas": 1}
        });
        assert!(observe(ResourceKind::StatefulSet, &full).unwrap().ready);
    }

    #[test]
    fn test_observe_namespace_and_others() {
        let ns = json!({"metadata": {"name": "shop"}, "status": {"phase": "Terminating"}});
        assert!(!observe(ResourceKind::Namespace, &ns).unwrap().ready);

        let svc = json!({"metadata": {"name": "backend"}});
        assert!(observe(ResourceKind::Service, &svc).unwrap().ready);

        assert!(observe(ResourceKind::Service, &json!({"metadata": {}})).is_none());
    }

    #[test]
    fn test_base_args() {
        let client = KubectlClient::new()
            .with_context("kind-dev")
            .with_kubeconfig("/tmp/kube");
        assert_eq!(
            client.base_args(),
            vec!["--context", "kind-dev", "--kubeconfig", "/tmp/kube"]
        );
    }
}
