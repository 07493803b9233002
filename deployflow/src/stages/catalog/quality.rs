//! Quality scanning: scanner deployment and gate evaluation.

use super::names;
use crate::config::GatePolicy;
use crate::context::RunContext;
use crate::core::RunEvent;
use crate::errors::{DeployflowError, Result};
use crate::resources::{manifests, ResourceKind, Selector};
use crate::stages::{GateStatus, Stage};
use crate::verify::{all_ready, poll_until};
use async_trait::async_trait;
use tracing::{info, warn};

/// Name the dashboard forward is registered under for cleanup.
pub const DASHBOARD_RESOURCE: &str = "scanner-dashboard";

/// Deploys the scanner and opens its dashboard for the rest of the run.
///
/// Supplementary: failures are recorded as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSetup;

#[async_trait]
impl Stage for ScanSetup {
    fn name(&self) -> &str {
        names::SCAN_SETUP
    }

    fn fatal_on_failure(&self) -> bool {
        false
    }

    async fn precondition(&self, ctx: &RunContext) -> Result<bool> {
        Ok(ctx.config.scanner.enabled)
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let config = &ctx.config;
        ctx.apply_all(&[
            manifests::scanner_deployment(config)?,
            manifests::scanner_service(config)?,
        ])
        .await?;

        let selector = Selector::kind_in(ResourceKind::Pod, config.namespace.clone())
            .with_labels(manifests::pods_of(config, manifests::SCANNER_NAME));
        let verified = ctx.verify(&selector, &all_ready).await;
        if !verified.converged {
            return Err(DeployflowError::ConvergenceTimeout {
                subject: format!("scanner pods ({})", verified.summary()),
                attempts: verified.attempts_used,
            });
        }
        ctx.artifacts.mark_scanner_ready();

        let Some(dashboard) = ctx.ports.dashboard.as_ref() else {
            return Ok("scanner ready".to_string());
        };
        let handle = dashboard.open().await?;
        let address = handle.local_address();
        ctx.cleanup.register(DASHBOARD_RESOURCE, move || async move {
            handle.release().await.map_err(|e| e.to_string())
        });
        info!(%address, "scanner dashboard forwarded");
        Ok(format!("scanner ready, dashboard at {address}"))
    }
}

/// Submits the source for analysis and waits for the gate verdict.
///
/// Fatal only under [`GatePolicy::Enforcing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    policy: GatePolicy,
}

impl QualityGate {
    /// Creates the stage with the given policy.
    #[must_use]
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for QualityGate {
    fn name(&self) -> &str {
        names::QUALITY_GATE
    }

    fn fatal_on_failure(&self) -> bool {
        self.policy == GatePolicy::Enforcing
    }

    async fn precondition(&self, ctx: &RunContext) -> Result<bool> {
        // A scanner set up outside this run (test-only mode) is assumed reachable.
        if ctx.artifacts.was_attempted(names::SCAN_SETUP) && !ctx.artifacts.scanner_ready() {
            warn!("scanner did not become ready in this run, not submitting");
            return Ok(false);
        }
        Ok(ctx.config.scanner.enabled
            && ctx.ports.scanner.is_some()
            && ctx.credentials.scanner_token.is_some())
    }

    async fn action(&self, ctx: &RunContext) -> Result<String> {
        let (Some(scanner), Some(token)) =
            (ctx.ports.scanner.as_deref(), ctx.credentials.scanner_token.as_deref())
        else {
            return Err(DeployflowError::precondition(
                "quality scanner",
                format!("enable the scanner and set {}", ctx.config.scanner.token_env),
            ));
        };

        let source = ctx.artifacts.source_dir_or(&ctx.config.source.workdir);
        let handle = scanner.submit(&source, token).await?;
        ctx.artifacts.set_report(handle.clone());

        let subject = format!("quality gate for {}", handle.project_key);
        let (handle_ref, subject_ref, events) = (&handle, subject.as_str(), ctx.events.as_ref());
        let polled = poll_until(
            &ctx.config.gate_retry,
            &ctx.cancel,
            |attempt| async move {
                let status = scanner.gate_status(handle_ref, token).await;
                if let Err(e) = &status {
                    warn!(attempt, error = %e, "gate status unavailable");
                }
                let converged = matches!(status, Ok(GateStatus::Passed | GateStatus::Failed));
                events
                    .emit(&RunEvent::PollAttempt {
                        subject: subject_ref.to_string(),
                        attempt,
                        converged,
                    })
                    .await;
                status
            },
            |status| matches!(status, Ok(GateStatus::Passed | GateStatus::Failed)),
        )
        .await;

        if polled.cancelled {
            return Err(DeployflowError::Cancelled(ctx.cancel.reason().unwrap_or_default()));
        }
        match polled.last {
            Some(Ok(GateStatus::Passed)) => Ok(format!("{subject} passed")),
            Some(Ok(GateStatus::Failed)) => Err(DeployflowError::QualityGateFailure {
                status: GateStatus::Failed.to_string(),
                detail: format!("{subject} reported failure"),
            }),
            Some(Err(e)) => Err(e),
            Some(Ok(GateStatus::Pending)) | None => Err(DeployflowError::QualityGateFailure {
                status: GateStatus::Pending.to_string(),
                detail: format!("still pending after {} attempts", polled.attempts),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterClient;
    use crate::errors::DeployflowError;
    use crate::stages::{MockQualityScanner, Ports, ReportHandle};
    use crate::testing::TestHarness;
    use std::sync::Arc;

    async fn with_namespace(harness: &TestHarness) {
        let ns = manifests::namespace(&harness.config).unwrap();
        harness.cluster.apply(&ns).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_setup_skipped_when_disabled() {
        let harness = TestHarness::new();
        assert!(!ScanSetup.precondition(&harness.context()).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_setup_registers_dashboard_release() {
        let harness = TestHarness::new().with_scanner();
        with_namespace(&harness).await;
        let ctx = harness.context();

        let msg = ScanSetup.action(&ctx).await.unwrap();
        assert!(msg.contains("dashboard at"));
        assert!(ctx.artifacts.scanner_ready());
        assert_eq!(harness.forwarder.opened(), 1);
        assert_eq!(ctx.cleanup.len(), 1);

        ctx.cleanup.release_all(std::time::Duration::from_secs(1)).await;
        assert_eq!(harness.forwarder.released(), 1);
    }

    #[tokio::test]
    async fn test_gate_passes() {
        let harness = TestHarness::new().with_scanner();
        harness.scanner.script([GateStatus::Pending, GateStatus::Passed]);
        let ctx = harness.context();

        let msg = QualityGate::new(GatePolicy::Advisory).action(&ctx).await.unwrap();
        assert!(msg.ends_with("passed"));
        assert_eq!(harness.scanner.polls(), 2);
        assert!(ctx.artifacts.report().is_some());
    }

    #[tokio::test]
    async fn test_gate_failure_and_persistent_pending() {
        let harness = TestHarness::new().with_scanner();
        harness.scanner.script([GateStatus::Failed]);
        let err = QualityGate::default().action(&harness.context()).await.unwrap_err();
        assert!(matches!(
            err,
            DeployflowError::QualityGateFailure { ref status, .. } if status == "failed"
        ));

        let harness = TestHarness::new().with_scanner();
        harness.scanner.script([GateStatus::Pending]);
        let err = QualityGate::default().action(&harness.context()).await.unwrap_err();
        assert!(err.to_string().contains("pending"));
        assert_eq!(harness.scanner.polls(), harness.config.gate_retry.max_attempts as usize);
    }

    #[test]
    fn test_gate_fatality_follows_policy() {
        assert!(!QualityGate::new(GatePolicy::Advisory).fatal_on_failure());
        assert!(QualityGate::new(GatePolicy::Enforcing).fatal_on_failure());
    }

    #[tokio::test]
    async fn test_gate_precondition_needs_token() {
        let harness = TestHarness::new()
            .with_scanner()
            .with_credentials(|c| c.scanner_token = None);
        assert!(!QualityGate::default().precondition(&harness.context()).await.unwrap());
    }

    #[tokio::test]
    async fn test_gate_precondition_follows_scan_setup() {
        let harness = TestHarness::new().with_scanner();
        let ctx = harness.context();
        let gate = QualityGate::default();
        assert!(gate.precondition(&ctx).await.unwrap());

        ctx.artifacts.mark_attempted(names::SCAN_SETUP);
        assert!(!gate.precondition(&ctx).await.unwrap());

        ctx.artifacts.mark_scanner_ready();
        assert!(gate.precondition(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_gate_with_mock_scanner() {
        let harness = TestHarness::new().with_scanner();
        let mut scanner = MockQualityScanner::new();
        scanner.expect_submit().times(1).returning(|_, _| {
            Ok(ReportHandle {
                project_key: "shop".into(),
                task_id: Some("AX1".into()),
            })
        });
        scanner
            .expect_gate_status()
            .times(1)
            .returning(|_, _| Ok(GateStatus::Passed));

        let ctx = harness.context();
        let ports: Ports = ctx.ports.clone().with_scanner(Arc::new(scanner));
        let ctx = ctx.with_ports(ports);
        assert!(QualityGate::default().action(&ctx).await.is_ok());
    }
}
