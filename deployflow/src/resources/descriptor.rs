//! Immutable declarative descriptions of cluster objects.

use crate::errors::DescriptorError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Label key marking objects managed by this tool.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label value for [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "deployflow";

/// The kinds of cluster object the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Namespace.
    Namespace,
    /// Configuration object.
    ConfigMap,
    /// Secret configuration object.
    Secret,
    /// Stateful workload.
    StatefulSet,
    /// Stateless workload.
    Deployment,
    /// Network service.
    Service,
    /// Ingress rule set.
    Ingress,
    /// Pod (observed, never applied directly).
    Pod,
}

impl ResourceKind {
    /// The object's `apiVersion`.
    #[must_use]
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Namespace | Self::ConfigMap | Self::Secret | Self::Service | Self::Pod => "v1",
            Self::StatefulSet | Self::Deployment => "apps/v1",
            Self::Ingress => "networking.k8s.io/v1",
        }
    }

    /// The resource name used on the kubectl command line.
    #[must_use]
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Namespace => "namespaces",
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
            Self::StatefulSet => "statefulsets.apps",
            Self::Deployment => "deployments.apps",
            Self::Service => "services",
            Self::Ingress => "ingresses.networking.k8s.io",
            Self::Pod => "pods",
        }
    }

    /// Returns true if objects of this kind live inside a namespace.
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::Namespace)
    }

    /// Returns true for kinds that run pods.
    #[must_use]
    pub fn is_workload(&self) -> bool {
        matches!(self, Self::StatefulSet | Self::Deployment)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Namespace => "Namespace",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::StatefulSet => "StatefulSet",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::Pod => "Pod",
        };
        f.write_str(name)
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Namespace" => Ok(Self::Namespace),
            "ConfigMap" => Ok(Self::ConfigMap),
            "Secret" => Ok(Self::Secret),
            "StatefulSet" => Ok(Self::StatefulSet),
            "Deployment" => Ok(Self::Deployment),
            "Service" => Ok(Self::Service),
            "Ingress" => Ok(Self::Ingress),
            "Pod" => Ok(Self::Pod),
            other => Err(format!("unsupported resource kind '{other}'")),
        }
    }
}

/// Identity of a cluster object: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Object kind.
    pub kind: ResourceKind,
    /// Namespace, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.kind.to_string().to_lowercase(),
            self.namespace.as_deref().unwrap_or("-"),
            self.name
        )
    }
}

/// An equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Creates an empty selector, which matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required label.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns true if every required label is present with the same value.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Returns true if the selector has no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The required labels.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&rendered.join(","))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSelector {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Addresses a set of cluster objects for reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Object kind.
    pub kind: ResourceKind,
    /// Namespace to search, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Exact object name, if addressing a single object.
    pub name: Option<String>,
    /// Label requirements.
    pub labels: LabelSelector,
}

impl Selector {
    /// Selects objects of a kind in a namespace.
    #[must_use]
    pub fn kind_in(kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: None,
            labels: LabelSelector::new(),
        }
    }

    /// Selects exactly the object a descriptor describes.
    #[must_use]
    pub fn for_descriptor(descriptor: &ResourceDescriptor) -> Self {
        Self {
            kind: descriptor.kind(),
            namespace: descriptor.namespace().map(str::to_string),
            name: Some(descriptor.name().to_string()),
            labels: LabelSelector::new(),
        }
    }

    /// Adds label requirements.
    #[must_use]
    pub fn with_labels(mut self, labels: LabelSelector) -> Self {
        self.labels = labels;
        self
    }

    /// Short description used in logs and messages.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("{}", self.kind);
        if let Some(name) = &self.name {
            out.push_str(&format!(" {name}"));
        }
        if !self.labels.is_empty() {
            out.push_str(&format!(" [{}]", self.labels));
        }
        if let Some(ns) = &self.namespace {
            out.push_str(&format!(" in {ns}"));
        }
        out
    }
}

fn dns_label() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
    })
    .as_ref()
}

fn label_value() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").ok())
        .as_ref()
}

fn is_match(re: Option<&Regex>, value: &str) -> bool {
    re.is_some_and(|re| re.is_match(value))
}

fn validate_name(field: &'static str, value: &str) -> Result<(), DescriptorError> {
    if value.is_empty() || value.len() > 63 || !is_match(dns_label(), value) {
        return Err(DescriptorError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn validate_label(key: &str, value: &str) -> Result<(), DescriptorError> {
    let name_part = key.rsplit('/').next().unwrap_or(key);
    let key_ok =
        !name_part.is_empty() && name_part.len() <= 63 && is_match(label_value(), name_part);
    if !key_ok || value.len() > 63 || !is_match(label_value(), value) {
        return Err(DescriptorError::InvalidLabel {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Immutable desired state of one cluster object.
///
/// The payload holds everything below the object's metadata (`spec`, `data`,
/// `stringData`, ...) and is treated as opaque beyond shape validation.
/// Changing anything produces a new descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    id: ResourceId,
    labels: BTreeMap<String, String>,
    payload: Value,
}

impl ResourceDescriptor {
    /// Creates a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, a namespace on a cluster-scoped
    /// kind (or a missing one on a namespaced kind), or a payload that is not
    /// a JSON object or overrides identity fields.
    pub fn new(
        kind: ResourceKind,
        namespace: Option<&str>,
        name: impl Into<String>,
        payload: Value,
    ) -> Result<Self, DescriptorError> {
        let name = name.into();
        validate_name("name", &name)?;

        match (kind.is_namespaced(), namespace) {
            (true, None) => {
                return Err(DescriptorError::Scope {
                    kind: kind.to_string(),
                    name,
                    reason: "namespaced kind requires a namespace",
                })
            }
            (false, Some(_)) => {
                return Err(DescriptorError::Scope {
                    kind: kind.to_string(),
                    name,
                    reason: "cluster-scoped kind cannot have a namespace",
                })
            }
            (true, Some(ns)) => validate_name("namespace", ns)?,
            (false, None) => {}
        }

        let id = ResourceId {
            kind,
            namespace: namespace.map(str::to_string),
            name,
        };
        validate_payload(&id, &payload)?;

        Ok(Self {
            id,
            labels: BTreeMap::new(),
            payload,
        })
    }

    /// Returns a copy carrying the given labels in addition to existing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if any label is malformed.
    pub fn with_labels<I, K, V>(&self, labels: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        for (k, v) in labels {
            let (k, v) = (k.into(), v.into());
            validate_label(&k, &v)?;
            next.labels.insert(k, v);
        }
        Ok(next)
    }

    /// Returns a copy with a replaced payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid body.
    pub fn with_payload(&self, payload: Value) -> Result<Self, DescriptorError> {
        validate_payload(&self.id, &payload)?;
        Ok(Self {
            id: self.id.clone(),
            labels: self.labels.clone(),
            payload,
        })
    }

    /// Object identity.
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Object kind.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    /// Object namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.id.namespace.as_deref()
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Object labels.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Body below metadata.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Selector matching this object's own labels.
    #[must_use]
    pub fn label_selector(&self) -> LabelSelector {
        self.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Renders the complete object.
    #[must_use]
    pub fn to_manifest(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(self.id.name));
        if let Some(ns) = &self.id.namespace {
            metadata.insert("namespace".into(), json!(ns));
        }
        if !self.labels.is_empty() {
            metadata.insert("labels".into(), json!(self.labels));
        }

        let mut object = Map::new();
        object.insert("apiVersion".into(), json!(self.id.kind.api_version()));
        object.insert("kind".into(), json!(self.id.kind.to_string()));
        object.insert("metadata".into(), Value::Object(metadata));
        if let Value::Object(body) = &self.payload {
            for (k, v) in body {
                object.insert(k.clone(), v.clone());
            }
        }
        Value::Object(object)
    }

    /// SHA-256 of the rendered manifest, hex encoded.
    ///
    /// `serde_json` maps are ordered, so equal descriptors hash equally.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_manifest().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn validate_payload(id: &ResourceId, payload: &Value) -> Result<(), DescriptorError> {
    let Value::Object(body) = payload else {
        return Err(DescriptorError::InvalidPayload {
            resource: id.to_string(),
            reason: "payload must be a JSON object".into(),
        });
    };
    for reserved in ["apiVersion", "kind", "metadata"] {
        if body.contains_key(reserved) {
            return Err(DescriptorError::InvalidPayload {
                resource: id.to_string(),
                reason: format!("payload may not set '{reserved}'"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::Deployment,
            Some("shop"),
            "backend",
            json!({"spec": {"replicas": 2}}),
        )
        .unwrap()
    }

    #[test]
    fn test_identity_and_display() {
        let d = deployment();
        assert_eq!(d.id().to_string(), "deployment/shop/backend");
        assert_eq!(d.kind().api_version(), "apps/v1");
    }

    #[test]
    fn test_invalid_names_rejected() {
        let err = ResourceDescriptor::new(ResourceKind::Namespace, None, "Bad_Name", json!({}))
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidName { field: "name", .. }));

        let long = "a".repeat(64);
        assert!(ResourceDescriptor::new(ResourceKind::Namespace, None, long, json!({})).is_err());
    }

    #[test]
    fn test_scope_enforced() {
        assert!(matches!(
            ResourceDescriptor::new(ResourceKind::Service, None, "svc", json!({})),
            Err(DescriptorError::Scope { .. })
        ));
        assert!(matches!(
            ResourceDescriptor::new(ResourceKind::Namespace, Some("x"), "ns", json!({})),
            Err(DescriptorError::Scope { .. })
        ));
    }

    #[test]
    fn test_payload_shape_enforced() {
        assert!(
            ResourceDescriptor::new(ResourceKind::ConfigMap, Some("a"), "b", json!([1])).is_err()
        );
        assert!(ResourceDescriptor::new(
            ResourceKind::ConfigMap,
            Some("a"),
            "b",
            json!({"metadata": {"name": "evil"}})
        )
        .is_err());
    }

    #[test]
    fn test_manifest_rendering() {
        let d = deployment()
            .with_labels([("app.kubernetes.io/name", "backend")])
            .unwrap();
        let manifest = d.to_manifest();
        assert_eq!(manifest["kind"], "Deployment");
        assert_eq!(manifest["metadata"]["namespace"], "shop");
        assert_eq!(manifest["metadata"]["labels"]["app.kubernetes.io/name"], "backend");
        assert_eq!(manifest["spec"]["replicas"], 2);
    }

    #[test]
    fn test_with_payload_returns_new_value() {
        let original = deployment();
        let updated = original.with_payload(json!({"spec": {"replicas": 3}})).unwrap();
        assert_eq!(original.payload()["spec"]["replicas"], 2);
        assert_eq!(updated.id(), original.id());
        assert_ne!(updated.digest(), original.digest());
        assert_eq!(original.digest(), deployment().digest());
    }

    #[test]
    fn test_invalid_label_rejected() {
        assert!(deployment().with_labels([("app", "has space")]).is_err());
    }

    #[test]
    fn test_label_selector_matching() {
        let selector = LabelSelector::new().with("tier", "web").with("app", "shop");
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "shop".to_string());
        assert!(!selector.matches(&labels));
        labels.insert("tier".to_string(), "web".to_string());
        assert!(selector.matches(&labels));
        assert_eq!(selector.to_string(), "app=shop,tier=web");
        assert!(LabelSelector::new().matches(&BTreeMap::new()));
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [ResourceKind::Ingress, ResourceKind::StatefulSet, ResourceKind::Pod] {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("CronJob".parse::<ResourceKind>().is_err());
    }
}
