//! Image publishing and reconciliation of the application objects.

use super::{merge_results, names};
use crate::cancellation::FailFastGroup;
use crate::cluster::ObservedObject;
use crate::context::RunContext;
use crate::errors::{DeployflowError, Result};
use crate::resources::manifests::{self, component, COMPONENT_LABEL};
use crate::resources::{ResourceKind, Selector};
use crate::stages::Stage;
use crate::verify::{all_ready, exists, VerifyResult};
use async_trait::async_trait;
use tracing::info;

/// Builds and pushes one image per service, concurrently.
///
/// The first failing image aborts the others and fails the stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePublish;

#[async_trait]
impl Stage for ImagePublish {
    fn name(&self) -> &str {
        names::IMAGE_PUBLISH
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let source = ctx.artifacts.source_dir_or(&ctx.config.source.workdir);
        let mut group = FailFastGroup::new();

        for service in &ctx.config.services {
            let registry = ctx.ports.registry.clone();
            let context_dir = source.join(&service.context_dir);
            let repository = ctx.config.repository(&service.name);
            let tag = ctx.config.image_tag.clone();
            let name = service.name.clone();
            group.spawn(async move {
                let artifact = registry.build(&context_dir, &repository).await?;
                let published = registry.publish(&artifact, &tag).await?;
                info!(service = %name, image = %published, "published");
                Ok::<_, DeployflowError>((name, published))
            });
        }

        let published = group.join().await?;
        let count = published.len();
        for (service, image) in published {
            ctx.artifacts.record_image(service, image);
        }
        Ok(format!("{count} images published"))
    }
}

fn pods_ready_selector(ctx: &RunContext, workload: &str) -> Selector {
    Selector::kind_in(ResourceKind::Pod, ctx.config.namespace.clone())
        .with_labels(manifests::pods_of(&ctx.config, workload))
}

/// Provisions the database: credentials, stateful workload, headless service.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseProvision;

#[async_trait]
impl Stage for DatabaseProvision {
    fn name(&self) -> &str {
        names::DATABASE_PROVISION
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let config = &ctx.config;
        let password = ctx.credentials.database_password.as_deref().ok_or_else(|| {
            DeployflowError::precondition(
                "database password",
                format!("set {}", config.database.password_env),
            )
        })?;
        ctx.apply_all(&[
            manifests::database_secret(config, password)?,
            manifests::database_statefulset(config)?,
            manifests::database_service(config)?,
        ])
        .await?;
        Ok(format!("database {} applied", config.database.name))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let selector = pods_ready_selector(ctx, &ctx.config.database.name);
        Some(ctx.verify(&selector, &all_ready).await)
    }
}

/// Deploys the application services: config, then workloads, then services.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceDeploy;

#[async_trait]
impl Stage for ServiceDeploy {
    fn name(&self) -> &str {
        names::SERVICE_DEPLOY
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let config = &ctx.config;
        let objects = manifests::application(config, |service| {
            ctx.artifacts
                .image_for(&service.name)
                .unwrap_or_else(|| config.image_ref(&service.name))
        })?;
        ctx.apply_all(&objects).await?;
        Ok(format!(
            "{} services deployed ({} objects)",
            config.services.len(),
            objects.len()
        ))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let mut results = Vec::with_capacity(ctx.config.services.len());
        for service in &ctx.config.services {
            let result = ctx
                .verify(&pods_ready_selector(ctx, &service.name), &all_ready)
                .await;
            let converged = result.converged;
            results.push(result);
            if !converged {
                break;
            }
        }
        merge_results(results)
    }
}

/// Publishes the ingress rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngressProvision;

#[async_trait]
impl Stage for IngressProvision {
    fn name(&self) -> &str {
        names::INGRESS_PROVISION
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let ingress = manifests::ingress(&ctx.config)?;
        ctx.cluster.apply(&ingress).await?;
        Ok(format!("ingress {} applied", ingress.name()))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let ingress = manifests::ingress(&ctx.config).ok()?;
        Some(ctx.verify(&Selector::for_descriptor(&ingress), &exists).await)
    }
}

/// Every application and database pod is Ready. The advisory scanner is
/// not part of the verdict.
fn workloads_ready(objects: &[ObservedObject]) -> bool {
    let mut relevant = objects
        .iter()
        .filter(|o| o.labels.get(COMPONENT_LABEL).map(String::as_str) != Some(component::SCANNER))
        .peekable();
    relevant.peek().is_some() && relevant.all(|o| o.ready)
}

/// Final health check over every workload of the project.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceVerify;

#[async_trait]
impl Stage for ConvergenceVerify {
    fn name(&self) -> &str {
        names::CONVERGENCE_VERIFY
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        Ok(format!("checking workloads in {}", ctx.config.namespace))
    }

    async fn postcondition(&self, ctx: &RunContext) -> Option<VerifyResult> {
        let selector = Selector::kind_in(ResourceKind::Pod, ctx.config.namespace.clone())
            .with_labels(manifests::workload_selector(&ctx.config));
        Some(ctx.verify(&selector, &workloads_ready).await)
    }
}
