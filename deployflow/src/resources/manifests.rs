//! Typed generation of the descriptors the deployment needs.
//!
//! Payloads are built programmatically from [`DeployConfig`] and validated
//! when the descriptor is constructed, separately from any apply call.

use super::{LabelSelector, ResourceDescriptor, ResourceKind, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::config::{DeployConfig, ServiceConfig};
use crate::errors::DescriptorError;
use serde_json::{json, Value};

/// `app.kubernetes.io/name`
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// `app.kubernetes.io/part-of`
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// `app.kubernetes.io/component`
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Component label values.
pub mod component {
    /// Application services.
    pub const APPLICATION: &str = "application";
    /// The database.
    pub const DATABASE: &str = "database";
    /// The code-quality scanner.
    pub const SCANNER: &str = "scanner";
    /// Shared objects (namespace, ingress).
    pub const PLATFORM: &str = "platform";
}

type Built = Result<ResourceDescriptor, DescriptorError>;

fn labels(config: &DeployConfig, name: &str, component: &str) -> Vec<(String, String)> {
    vec![
        (NAME_LABEL.to_string(), name.to_string()),
        (PART_OF_LABEL.to_string(), config.project.clone()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ]
}

fn pod_selector(config: &DeployConfig, name: &str) -> Value {
    json!({ NAME_LABEL: name, PART_OF_LABEL: config.project })
}

/// Selects every workload pod belonging to the project.
#[must_use]
pub fn workload_selector(config: &DeployConfig) -> LabelSelector {
    LabelSelector::new()
        .with(PART_OF_LABEL, config.project.clone())
        .with(MANAGED_BY_LABEL, MANAGED_BY_VALUE)
}

/// Selects the pods of one named workload.
#[must_use]
pub fn pods_of(config: &DeployConfig, name: &str) -> LabelSelector {
    LabelSelector::new()
        .with(NAME_LABEL, name)
        .with(PART_OF_LABEL, config.project.clone())
}

/// The target namespace.
pub fn namespace(config: &DeployConfig) -> Built {
    ResourceDescriptor::new(ResourceKind::Namespace, None, config.namespace.clone(), json!({}))?
        .with_labels(labels(config, &config.namespace, component::PLATFORM))
}

fn secret_name(config: &DeployConfig) -> String {
    format!("{}-credentials", config.database.name)
}

/// Database credentials.
pub fn database_secret(config: &DeployConfig, password: &str) -> Built {
    let db = &config.database;
    ResourceDescriptor::new(
        ResourceKind::Secret,
        Some(&config.namespace),
        secret_name(config),
        json!({
            "type": "Opaque",
            "stringData": {
                "POSTGRES_USER": db.user,
                "POSTGRES_DB": db.database,
                "POSTGRES_PASSWORD": password,
            }
        }),
    )?
    .with_labels(labels(config, &db.name, component::DATABASE))
}

/// Database stateful workload with a persistent volume claim template.
pub fn database_statefulset(config: &DeployConfig) -> Built {
    let db = &config.database;
    ResourceDescriptor::new(
        ResourceKind::StatefulSet,
        Some(&config.namespace),
        db.name.clone(),
        json!({
            "spec": {
                "serviceName": db.name,
                "replicas": 1,
                "selector": { "matchLabels": pod_selector(config, &db.name) },
                "template": {
                    "metadata": { "labels": labels_object(config, &db.name, component::DATABASE) },
                    "spec": {
                        "containers": [{
                            "name": db.name,
                            "image": db.image,
                            "ports": [{ "containerPort": db.port }],
                            "envFrom": [{ "secretRef": { "name": secret_name(config) } }],
                            "readinessProbe": {
                                "exec": { "command": ["pg_isready", "-U", db.user] },
                                "periodSeconds": 5
                            },
                            "volumeMounts": [{
                                "name": "data",
                                "mountPath": "/var/lib/postgresql/data"
                            }]
                        }]
                    }
                },
                "volumeClaimTemplates": [{
                    "metadata": { "name": "data" },
                    "spec": {
                        "accessModes": ["ReadWriteOnce"],
                        "resources": { "requests": { "storage": db.storage } }
                    }
                }]
            }
        }),
    )?
    .with_labels(labels(config, &db.name, component::DATABASE))
}

/// Headless service giving the database a stable address.
pub fn database_service(config: &DeployConfig) -> Built {
    let db = &config.database;
    ResourceDescriptor::new(
        ResourceKind::Service,
        Some(&config.namespace),
        db.name.clone(),
        json!({
            "spec": {
                "clusterIP": "None",
                "selector": pod_selector(config, &db.name),
                "ports": [{ "port": db.port, "targetPort": db.port }]
            }
        }),
    )?
    .with_labels(labels(config, &db.name, component::DATABASE))
}

fn labels_object(config: &DeployConfig, name: &str, component: &str) -> Value {
    let map: serde_json::Map<String, Value> = labels(config, name, component)
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    Value::Object(map)
}

fn config_name(service: &ServiceConfig) -> String {
    format!("{}-config", service.name)
}

/// Non-secret configuration for an application service.
pub fn service_config(config: &DeployConfig, service: &ServiceConfig) -> Built {
    let mut data = serde_json::Map::new();
    data.insert("DATABASE_HOST".into(), json!(config.database.name));
    data.insert("DATABASE_PORT".into(), json!(config.database.port.to_string()));
    data.insert("DATABASE_NAME".into(), json!(config.database.database));
    for (k, v) in &service.env {
        data.insert(k.clone(), json!(v));
    }
    ResourceDescriptor::new(
        ResourceKind::ConfigMap,
        Some(&config.namespace),
        config_name(service),
        json!({ "data": data }),
    )?
    .with_labels(labels(config, &service.name, component::APPLICATION))
}

/// Stateless workload for an application service with rolling updates.
pub fn service_deployment(config: &DeployConfig, service: &ServiceConfig, image: &str) -> Built {
    ResourceDescriptor::new(
        ResourceKind::Deployment,
        Some(&config.namespace),
        service.name.clone(),
        json!({
            "spec": {
                "replicas": service.replicas,
                "selector": { "matchLabels": pod_selector(config, &service.name) },
                "strategy": {
                    "type": "RollingUpdate",
                    "rollingUpdate": { "maxSurge": 1, "maxUnavailable": 0 }
                },
                "template": {
                    "metadata": {
                        "labels": labels_object(config, &service.name, component::APPLICATION)
                    },
                    "spec": {
                        "containers": [{
                            "name": service.name,
                            "image": image,
                            "imagePullPolicy": "Always",
                            "ports": [{ "containerPort": service.port }],
                            "envFrom": [
                                { "configMapRef": { "name": config_name(service) } },
                                { "secretRef": { "name": secret_name(config) } }
                            ],
                            "readinessProbe": {
                                "tcpSocket": { "port": service.port },
                                "periodSeconds": 5
                            }
                        }]
                    }
                }
            }
        }),
    )?
    .with_labels(labels(config, &service.name, component::APPLICATION))
}

/// Cluster-internal service for an application service.
pub fn service_service(config: &DeployConfig, service: &ServiceConfig) -> Built {
    ResourceDescriptor::new(
        ResourceKind::Service,
        Some(&config.namespace),
        service.name.clone(),
        json!({
            "spec": {
                "selector": pod_selector(config, &service.name),
                "ports": [{ "port": service.port, "targetPort": service.port }]
            }
        }),
    )?
    .with_labels(labels(config, &service.name, component::APPLICATION))
}

/// Ingress routing each service's path prefix to its service.
pub fn ingress(config: &DeployConfig) -> Built {
    let paths: Vec<Value> = config
        .services
        .iter()
        .filter_map(|s| {
            s.path.as_ref().map(|path| {
                json!({
                    "path": path,
                    "pathType": "Prefix",
                    "backend": { "service": { "name": s.name, "port": { "number": s.port } } }
                })
            })
        })
        .collect();

    let mut rule = json!({ "http": { "paths": paths } });
    if let Some(host) = &config.ingress.host {
        rule["host"] = json!(host);
    }
    let mut spec = json!({ "rules": [rule] });
    if let Some(class) = &config.ingress.class {
        spec["ingressClassName"] = json!(class);
    }

    let name = format!("{}-ingress", config.project);
    ResourceDescriptor::new(
        ResourceKind::Ingress,
        Some(&config.namespace),
        name.clone(),
        json!({ "spec": spec }),
    )?
    .with_labels(labels(config, &name, component::PLATFORM))
}

/// Name of the scanner workload and service.
pub const SCANNER_NAME: &str = "sonarqube";

/// Scanner server workload.
pub fn scanner_deployment(config: &DeployConfig) -> Built {
    let scanner = &config.scanner;
    ResourceDescriptor::new(
        ResourceKind::Deployment,
        Some(&config.namespace),
        SCANNER_NAME,
        json!({
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": pod_selector(config, SCANNER_NAME) },
                "template": {
                    "metadata": {
                        "labels": labels_object(config, SCANNER_NAME, component::SCANNER)
                    },
                    "spec": {
                        "containers": [{
                            "name": SCANNER_NAME,
                            "image": scanner.image,
                            "ports": [{ "containerPort": scanner.port }],
                            "readinessProbe": {
                                "httpGet": { "path": "/api/system/status", "port": scanner.port },
                                "periodSeconds": 10
                            }
                        }]
                    }
                }
            }
        }),
    )?
    .with_labels(labels(config, SCANNER_NAME, component::SCANNER))
}

/// Scanner service.
pub fn scanner_service(config: &DeployConfig) -> Built {
    ResourceDescriptor::new(
        ResourceKind::Service,
        Some(&config.namespace),
        SCANNER_NAME,
        json!({
            "spec": {
                "selector": pod_selector(config, SCANNER_NAME),
                "ports": [{ "port": config.scanner.port, "targetPort": config.scanner.port }]
            }
        }),
    )?
    .with_labels(labels(config, SCANNER_NAME, component::SCANNER))
}

/// Application objects in apply order: config before workloads, then services.
///
/// `image_for` resolves the image reference for each service.
pub fn application<F>(
    config: &DeployConfig,
    image_for: F,
) -> Result<Vec<ResourceDescriptor>, DescriptorError>
where
    F: Fn(&ServiceConfig) -> String,
{
    let mut out = Vec::with_capacity(config.services.len() * 3);
    for service in &config.services {
        out.push(service_config(config, service)?);
    }
    for service in &config.services {
        out.push(service_deployment(config, service, &image_for(service))?);
    }
    for service in &config.services {
        out.push(service_service(config, service)?);
    }
    Ok(out)
}

/// Every object a previous run may have left behind, in deletion order.
///
/// The database secret payload is irrelevant for deletion, so a placeholder
/// password is used.
pub fn managed_for_cleanup(
    config: &DeployConfig,
) -> Result<Vec<ResourceDescriptor>, DescriptorError> {
    let mut out = vec![ingress(config)?];
    for service in &config.services {
        out.push(service_service(config, service)?);
        out.push(service_deployment(config, service, "")?);
        out.push(service_config(config, service)?);
    }
    out.push(database_service(config)?);
    out.push(database_statefulset(config)?);
    out.push(database_secret(config, "")?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeployConfig {
        DeployConfig::default()
    }

    #[test]
    fn test_namespace_is_cluster_scoped() {
        let ns = namespace(&config()).unwrap();
        assert_eq!(ns.kind(), ResourceKind::Namespace);
        assert!(ns.namespace().is_none());
        assert_eq!(ns.labels().get(MANAGED_BY_LABEL).map(String::as_str), Some("deployflow"));
    }

    #[test]
    fn test_deployment_has_rolling_update() {
        let cfg = config();
        let d = service_deployment(&cfg, &cfg.services[0], "reg/shop/backend:latest").unwrap();
        let spec = &d.payload()["spec"];
        assert_eq!(spec["strategy"]["type"], "RollingUpdate");
        assert_eq!(spec["strategy"]["rollingUpdate"]["maxUnavailable"], 0);
        assert_eq!(spec["template"]["spec"]["containers"][0]["image"], "reg/shop/backend:latest");
        assert_eq!(spec["replicas"], 2);
    }

    #[test]
    fn test_pod_template_matches_workload_selector() {
        let cfg = config();
        let d = service_deployment(&cfg, &cfg.services[1], "img").unwrap();
        let template_labels: std::collections::BTreeMap<String, String> = serde_json::from_value(
            d.payload()["spec"]["template"]["metadata"]["labels"].clone(),
        )
        .unwrap();
        assert!(workload_selector(&cfg).matches(&template_labels));
        assert!(pods_of(&cfg, "frontend").matches(&template_labels));
    }

    #[test]
    fn test_application_orders_config_before_workloads() {
        let cfg = config();
        let objects = application(&cfg, |s| cfg.image_ref(&s.name)).unwrap();
        let kinds: Vec<ResourceKind> = objects.iter().map(ResourceDescriptor::kind).collect();
        let first_workload = kinds.iter().position(|k| *k == ResourceKind::Deployment).unwrap();
        let last_config = kinds.iter().rposition(|k| *k == ResourceKind::ConfigMap).unwrap();
        assert!(last_config < first_workload);
        assert_eq!(objects.len(), 6);
    }

    #[test]
    fn test_ingress_routes_each_path() {
        let mut cfg = config();
        cfg.ingress.host = Some("shop.example.com".into());
        let ing = ingress(&cfg).unwrap();
        let rule = &ing.payload()["spec"]["rules"][0];
        assert_eq!(rule["host"], "shop.example.com");
        assert_eq!(rule["http"]["paths"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_database_config_carries_connection_details() {
        let cfg = config();
        let cm = service_config(&cfg, &cfg.services[0]).unwrap();
        assert_eq!(cm.payload()["data"]["DATABASE_HOST"], "postgres");
        assert_eq!(cm.payload()["data"]["DATABASE_PORT"], "5432");
    }

    #[test]
    fn test_cleanup_starts_with_ingress() {
        let objects = managed_for_cleanup(&config()).unwrap();
        assert_eq!(objects[0].kind(), ResourceKind::Ingress);
        assert_eq!(objects.last().unwrap().kind(), ResourceKind::Secret);
    }
}
