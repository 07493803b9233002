//! Stages that prepare or remove the target environment.

use super::names;
use crate::context::RunContext;
use crate::errors::{DeployflowError, Result};
use crate::resources::{manifests, ResourceDescriptor, Selector};
use crate::stages::Stage;
use crate::verify::{all_ready, VerifyResult};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Confirms required tools and credentials before anything is mutated.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrerequisiteCheck;

#[async_trait]
impl Stage for PrerequisiteCheck {
    fn name(&self) -> &str {
        names::PREREQUISITE_CHECK
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let mut missing = Vec::new();
        for tool in &ctx.config.required_tools {
            if ctx.ports.toolchain.has_tool(tool).await {
                debug!(tool = %tool, "found");
            } else {
                missing.push(tool.clone());
            }
        }
        if !missing.is_empty() {
            return Err(DeployflowError::precondition(
                missing.join(", "),
                "install the missing tools and make sure they are on PATH",
            ));
        }

        if ctx.credentials.database_password.is_none() {
            return Err(DeployflowError::precondition(
                "database password",
                format!("set {}", ctx.config.database.password_env),
            ));
        }

        let mut message = format!("{} tools available", ctx.config.required_tools.len());
        if ctx.config.scanner.enabled && ctx.credentials.scanner_token.is_none() {
            warn!(
                env = %ctx.config.scanner.token_env,
                "scanner token not set, quality gate will be skipped"
            );
            message.push_str("; scanner token missing");
        }
        Ok(message)
    }
}

/// Removes objects a previous run may have left behind.
///
/// Best effort: missing objects are fine, and failures only warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaleCleanup;

#[async_trait]
impl Stage for StaleCleanup {
    fn name(&self) -> &str {
        names::STALE_CLEANUP
    }

    fn fatal_on_failure(&self) -> bool {
        false
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let stale = manifests::managed_for_cleanup(&ctx.config)?;
        for descriptor in &stale {
            ctx.cluster.delete(descriptor, true).await?;
            debug!(resource = %descriptor.id(), "cleared");
        }
        Ok(format!("{} objects cleared", stale.len()))
    }
}

/// Creates the target namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceEnsure;

#[async_trait]
impl Stage for NamespaceEnsure {
    fn name(&self) -> &str {
        names::NAMESPACE_ENSURE
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let namespace = manifests::namespace(&ctx.config)?;
        ctx.cluster.apply(&namespace).await?;
        Ok(format!("namespace {} applied", ctx.config.namespace))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let namespace = manifests::namespace(&ctx.config).ok()?;
        Some(ctx.verify(&Selector::for_descriptor(&namespace), &all_ready).await)
    }
}

/// Removes everything the deployment created, namespace last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Teardown;

impl Teardown {
    fn targets(ctx: &RunContext) -> Result<Vec<ResourceDescriptor>> {
        let config = &ctx.config;
        let mut targets = manifests::managed_for_cleanup(config)?;
        targets.push(manifests::scanner_service(config)?);
        targets.push(manifests::scanner_deployment(config)?);
        targets.push(manifests::namespace(config)?);
        Ok(targets)
    }
}

#[async_trait]
impl Stage for Teardown {
    fn name(&self) -> &str {
        names::TEARDOWN
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let targets = Self::targets(ctx)?;
        for descriptor in &targets {
            ctx.cluster.delete(descriptor, true).await?;
        }
        info!(namespace = %ctx.config.namespace, "teardown requested");
        Ok(format!("{} objects deleted", targets.len()))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let namespace = manifests::namespace(&ctx.config).ok()?;
        Some(
            ctx.verifier()
                .verify_absent(
                    ctx.cluster.as_ref(),
                    &Selector::for_descriptor(&namespace),
                    &ctx.cancel,
                )
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterClient;
    use crate::errors::ClusterError;
    use crate::resources::ResourceKind;
    use crate::testing::TestHarness;

    #[tokio::test]
    async fn test_prerequisites_report_missing_tools() {
        let harness = TestHarness::new();
        harness.toolchain.remove("docker");
        let err = PrerequisiteCheck.action(&harness.context()).await.unwrap_err();
        assert_eq!(err.kind(), "precondition_unmet");
        assert!(err.to_string().contains("docker"));
        assert_eq!(harness.cluster.counters().total(), 0);
    }

    #[tokio::test]
    async fn test_prerequisites_require_database_password() {
        let harness = TestHarness::new().with_credentials(|c| c.database_password = None);
        let err = PrerequisiteCheck.action(&harness.context()).await.unwrap_err();
        assert!(err.to_string().contains("DEPLOYFLOW_DB_PASSWORD"));
    }

    #[tokio::test]
    async fn test_stale_cleanup_on_empty_cluster() {
        let harness = TestHarness::new();
        let msg = StaleCleanup.action(&harness.context()).await.unwrap();
        assert!(msg.ends_with("objects cleared"));
        assert!(harness.cluster.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_ensure_is_idempotent() {
        let harness = TestHarness::new();
        let ctx = harness.context();
        NamespaceEnsure.action(&ctx).await.unwrap();
        NamespaceEnsure.action(&ctx).await.unwrap();
        assert_eq!(harness.cluster.len(), 1);
        assert!(NamespaceEnsure.postcondition(&ctx).await.unwrap().converged);
    }

    #[tokio::test]
    async fn test_namespace_ensure_surfaces_cluster_errors() {
        let harness = TestHarness::new();
        harness
            .cluster
            .fail_all_with(Some(ClusterError::Unreachable("dial tcp: refused".into())));
        let err = NamespaceEnsure.action(&harness.context()).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }

    #[tokio::test]
    async fn test_teardown_removes_namespace() {
        let harness = TestHarness::new();
        let ctx = harness.context();
        let ns = manifests::namespace(&ctx.config).unwrap();
        harness.cluster.apply(&ns).await.unwrap();

        Teardown.action(&ctx).await.unwrap();
        assert!(harness.cluster.is_empty());
        let verified = Teardown.postcondition(&ctx).await.unwrap();
        assert!(verified.converged);
        assert!(!harness.cluster.ids().iter().any(|id| id.kind == ResourceKind::Namespace));
    }
}
