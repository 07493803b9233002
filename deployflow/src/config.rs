//! Run configuration.
//!
//! A [`DeployConfig`] is loaded once (JSON file, then environment overrides)
//! and passed explicitly into the pipeline. Secrets are resolved into a
//! [`Credentials`] value at load time; nothing reads the environment later.

use crate::errors::{DeployflowError, Result};
use crate::verify::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a failing quality gate affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Record a warning and keep deploying.
    #[default]
    Advisory,
    /// Abort the run.
    Enforcing,
}

impl std::str::FromStr for GatePolicy {
    type Err = DeployflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "advisory" | "warn" => Ok(Self::Advisory),
            "enforcing" | "fatal" => Ok(Self::Enforcing),
            other => Err(DeployflowError::Config(format!("unknown gate policy '{other}'"))),
        }
    }
}

/// Where the application source comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Repository URL.
    #[serde(default)]
    pub url: String,
    /// Branch to check out.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Local checkout directory.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Fetch only the tip commit.
    #[serde(default = "default_true")]
    pub shallow: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
            workdir: default_workdir(),
            shallow: true,
        }
    }
}

/// One application service (built into an image and deployed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name; also the image name.
    pub name: String,
    /// Build context relative to the source checkout.
    #[serde(default)]
    pub context_dir: PathBuf,
    /// Container port.
    pub port: u16,
    /// Desired replica count.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Ingress path prefix routed to this service.
    #[serde(default)]
    pub path: Option<String>,
    /// Non-secret environment, placed in a config object.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The stateful database dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Workload and service name.
    #[serde(default = "default_db_name")]
    pub name: String,
    /// Container image.
    #[serde(default = "default_db_image")]
    pub image: String,
    /// Listening port.
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Persistent volume size.
    #[serde(default = "default_db_storage")]
    pub storage: String,
    /// Database user.
    #[serde(default = "default_db_user")]
    pub user: String,
    /// Database name.
    #[serde(default = "default_db_database")]
    pub database: String,
    /// Environment variable holding the password.
    #[serde(default = "default_db_password_env")]
    pub password_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            image: default_db_image(),
            port: default_db_port(),
            storage: default_db_storage(),
            user: default_db_user(),
            database: default_db_database(),
            password_env: default_db_password_env(),
        }
    }
}

/// Ingress settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Virtual host; `None` matches any host.
    #[serde(default)]
    pub host: Option<String>,
    /// Ingress class.
    #[serde(default)]
    pub class: Option<String>,
}

/// Code-quality scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Whether scan setup and the quality gate run at all.
    #[serde(default)]
    pub enabled: bool,
    /// Scanner server image deployed into the namespace.
    #[serde(default = "default_scanner_image")]
    pub image: String,
    /// Scanner service port.
    #[serde(default = "default_scanner_port")]
    pub port: u16,
    /// Local port the dashboard is forwarded to.
    #[serde(default = "default_scanner_port")]
    pub local_port: u16,
    /// Scanner server URL; defaults to the forwarded local port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Project key on the scanner.
    #[serde(default)]
    pub project_key: String,
    /// Environment variable holding the scanner token.
    #[serde(default = "default_scanner_token_env")]
    pub token_env: String,
}

impl ScannerConfig {
    /// Base URL of the scanner API.
    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://127.0.0.1:{}", self.local_port),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image: default_scanner_image(),
            port: default_scanner_port(),
            local_port: default_scanner_port(),
            url: None,
            project_key: String::new(),
            token_env: default_scanner_token_env(),
        }
    }
}

/// Complete configuration for one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Project name; used as the `part-of` label.
    #[serde(default = "default_project")]
    pub project: String,
    /// Target namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Target image registry (host[/path]).
    #[serde(default = "default_registry")]
    pub registry: String,
    /// Tag applied to published images.
    #[serde(default = "default_image_tag")]
    pub image_tag: String,
    /// Overall run deadline in seconds.
    #[serde(default = "default_timeout_budget")]
    pub timeout_budget_secs: u64,
    /// Polling policy for cluster convergence checks.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Polling policy for the quality gate.
    #[serde(default = "default_gate_retry")]
    pub gate_retry: RetryPolicy,
    /// Quality gate fatality.
    #[serde(default)]
    pub gate_policy: GatePolicy,
    /// Application source.
    #[serde(default)]
    pub source: SourceConfig,
    /// Application services.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
    /// Database dependency.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ingress settings.
    #[serde(default)]
    pub ingress: IngressConfig,
    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Test command run inside the checkout.
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,
    /// Tools that must be on `PATH`.
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_project() -> String {
    "shop".to_string()
}

fn default_namespace() -> String {
    "shop".to_string()
}

fn default_registry() -> String {
    "localhost:5000".to_string()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_timeout_budget() -> u64 {
    1800
}

fn default_gate_retry() -> RetryPolicy {
    RetryPolicy::constant(20, Duration::from_secs(15))
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_workdir() -> PathBuf {
    PathBuf::from("./.deployflow/source")
}

fn default_true() -> bool {
    true
}

fn default_replicas() -> u32 {
    1
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "backend".to_string(),
            context_dir: PathBuf::from("backend"),
            port: 8080,
            replicas: 2,
            path: Some("/api".to_string()),
            env: BTreeMap::new(),
        },
        ServiceConfig {
            name: "frontend".to_string(),
            context_dir: PathBuf::from("frontend"),
            port: 80,
            replicas: 2,
            path: Some("/".to_string()),
            env: BTreeMap::new(),
        },
    ]
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_db_image() -> String {
    "postgres:16-alpine".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_storage() -> String {
    "1Gi".to_string()
}

fn default_db_user() -> String {
    "app".to_string()
}

fn default_db_database() -> String {
    "app".to_string()
}

fn default_db_password_env() -> String {
    "DEPLOYFLOW_DB_PASSWORD".to_string()
}

fn default_scanner_image() -> String {
    "sonarqube:lts-community".to_string()
}

fn default_scanner_port() -> u16 {
    9000
}

fn default_scanner_token_env() -> String {
    "DEPLOYFLOW_SCANNER_TOKEN".to_string()
}

fn default_test_command() -> Vec<String> {
    vec!["make".to_string(), "test".to_string()]
}

fn default_required_tools() -> Vec<String> {
    vec!["kubectl".to_string(), "docker".to_string(), "git".to_string()]
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            namespace: default_namespace(),
            registry: default_registry(),
            image_tag: default_image_tag(),
            timeout_budget_secs: default_timeout_budget(),
            retry: RetryPolicy::default(),
            gate_retry: default_gate_retry(),
            gate_policy: GatePolicy::default(),
            source: SourceConfig::default(),
            services: default_services(),
            database: DatabaseConfig::default(),
            ingress: IngressConfig::default(),
            scanner: ScannerConfig::default(),
            test_command: default_test_command(),
            required_tools: default_required_tools(),
        }
    }
}

impl DeployConfig {
    /// Loads configuration from an optional JSON file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw).map_err(|e| {
                    DeployflowError::Config(format!("{}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DEPLOYFLOW_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override value cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ns) = lookup("DEPLOYFLOW_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(registry) = lookup("DEPLOYFLOW_REGISTRY") {
            self.registry = registry;
        }
        if let Some(tag) = lookup("DEPLOYFLOW_IMAGE_TAG") {
            self.image_tag = tag;
        }
        if let Some(secs) = lookup("DEPLOYFLOW_TIMEOUT_SECS") {
            self.timeout_budget_secs = secs.parse().map_err(|_| {
                DeployflowError::Config(format!(
                    "DEPLOYFLOW_TIMEOUT_SECS is not a number: '{secs}'"
                ))
            })?;
        }
        if let Some(policy) = lookup("DEPLOYFLOW_GATE_POLICY") {
            self.gate_policy = policy.parse()?;
        }
        Ok(())
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(DeployflowError::Config("project cannot be empty".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(DeployflowError::Config("namespace cannot be empty".into()));
        }
        if self.registry.trim().is_empty() {
            return Err(DeployflowError::Config("registry cannot be empty".into()));
        }
        if self.timeout_budget_secs == 0 {
            return Err(DeployflowError::Config("timeout_budget_secs must be positive".into()));
        }
        if self.retry.max_attempts == 0 || self.gate_retry.max_attempts == 0 {
            return Err(DeployflowError::Config("retry max_attempts must be at least 1".into()));
        }
        if self.services.is_empty() {
            return Err(DeployflowError::Config("at least one service is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(DeployflowError::Config(format!(
                    "duplicate service '{}'",
                    service.name
                )));
            }
            if service.name == self.database.name {
                return Err(DeployflowError::Config(format!(
                    "service '{}' collides with the database name",
                    service.name
                )));
            }
        }
        if self.scanner.enabled && self.scanner.project_key.trim().is_empty() {
            return Err(DeployflowError::Config(
                "scanner.project_key is required when the scanner is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Overall run deadline.
    #[must_use]
    pub fn timeout_budget(&self) -> Duration {
        Duration::from_secs(self.timeout_budget_secs)
    }

    /// Image repository for a service, without tag.
    #[must_use]
    pub fn repository(&self, service: &str) -> String {
        format!("{}/{}/{}", self.registry.trim_end_matches('/'), self.project, service)
    }

    /// Fully qualified image reference for a service.
    #[must_use]
    pub fn image_ref(&self, service: &str) -> String {
        format!("{}:{}", self.repository(service), self.image_tag)
    }
}

/// Secrets resolved from the environment at load time.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Scanner API token.
    pub scanner_token: Option<String>,
    /// Database password.
    pub database_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("scanner_token", &self.scanner_token.as_ref().map(|_| "<redacted>"))
            .field("database_password", &self.database_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Resolves the secrets named by `config` from the process environment.
    #[must_use]
    pub fn from_env(config: &DeployConfig) -> Self {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// Resolves the secrets named by `config` through `lookup`.
    #[must_use]
    pub fn resolve<F>(config: &DeployConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: String| if v.is_empty() { None } else { Some(v) };
        Self {
            scanner_token: lookup(&config.scanner.token_env).and_then(non_empty),
            database_password: lookup(&config.database.password_env).and_then(non_empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DeployConfig::default();
        config.validate().unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.gate_policy, GatePolicy::Advisory);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let raw = r#"{"namespace": "staging", "gate_policy": "enforcing"}"#;
        let config: DeployConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.gate_policy, GatePolicy::Enforcing);
        assert_eq!(config.project, "shop");
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DEPLOYFLOW_NAMESPACE", "qa"),
            ("DEPLOYFLOW_REGISTRY", "registry.example.com"),
            ("DEPLOYFLOW_TIMEOUT_SECS", "60"),
            ("DEPLOYFLOW_GATE_POLICY", "fatal"),
        ]
        .into_iter()
        .collect();

        let mut config = DeployConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.namespace, "qa");
        assert_eq!(config.registry, "registry.example.com");
        assert_eq!(config.timeout_budget(), Duration::from_secs(60));
        assert_eq!(config.gate_policy, GatePolicy::Enforcing);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = DeployConfig::default();
        let err = config
            .apply_overrides(|k| (k == "DEPLOYFLOW_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DeployConfig::default();
        config.services.push(config.services[0].clone());
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.scanner.enabled = true;
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.timeout_budget_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"project": "demo", "image_tag": "v1"}}"#).unwrap();

        let config = DeployConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.project, "demo");
    }

    #[test]
    fn test_image_ref() {
        let mut config = DeployConfig::default();
        config.registry = "registry.local/".into();
        config.image_tag = "1.2.3".into();
        assert_eq!(config.image_ref("backend"), "registry.local/shop/backend:1.2.3");
    }

    #[test]
    fn test_credentials_resolve_and_redact() {
        let config = DeployConfig::default();
        let creds = Credentials::resolve(&config, |k| match k {
            "DEPLOYFLOW_DB_PASSWORD" => Some("s3cret".into()),
            "DEPLOYFLOW_SCANNER_TOKEN" => Some(String::new()),
            _ => None,
        });
        assert_eq!(creds.database_password.as_deref(), Some("s3cret"));
        assert!(creds.scanner_token.is_none());
        assert!(!format!("{creds:?}").contains("s3cret"));
    }
}
