//! The fixed stage set of a deployment, in canonical order.
//!
//! The engine does not hardcode this order; [`canonical`] hands it to the
//! pipeline builder like any other stage list, and pipeline modes select
//! sub-lists of it by name.

mod deploy;
mod environment;
mod quality;
mod source;

pub use deploy::{
    ConvergenceVerify, DatabaseProvision, ImagePublish, IngressProvision, ServiceDeploy,
};
pub use environment::{NamespaceEnsure, PrerequisiteCheck, StaleCleanup, Teardown};
pub use quality::{QualityGate, ScanSetup};
pub use source::{SourcePrepare, TestExecution};

use crate::config::DeployConfig;
use crate::pipeline::StageSpec;
use crate::verify::VerifyResult;
use std::sync::Arc;

/// Stable stage names.
pub mod names {
    /// Tools and credentials are present.
    pub const PREREQUISITE_CHECK: &str = "prerequisite-check";
    /// Leftovers from earlier runs are removed.
    pub const STALE_CLEANUP: &str = "stale-cleanup";
    /// The target namespace exists.
    pub const NAMESPACE_ENSURE: &str = "namespace-ensure";
    /// Source is checked out locally.
    pub const SOURCE_PREPARE: &str = "source-prepare";
    /// The quality scanner is deployed.
    pub const SCAN_SETUP: &str = "scan-setup";
    /// The test suite passes.
    pub const TEST_EXECUTION: &str = "test-execution";
    /// The quality gate verdict is read.
    pub const QUALITY_GATE: &str = "quality-gate";
    /// Service images are built and pushed.
    pub const IMAGE_PUBLISH: &str = "image-publish";
    /// The database is running.
    pub const DATABASE_PROVISION: &str = "database-provision";
    /// Application services are deployed.
    pub const SERVICE_DEPLOY: &str = "service-deploy";
    /// The ingress routes traffic.
    pub const INGRESS_PROVISION: &str = "ingress-provision";
    /// Every workload pod is ready.
    pub const CONVERGENCE_VERIFY: &str = "convergence-verify";
    /// Everything, namespace included, is removed.
    pub const TEARDOWN: &str = "teardown";

    /// All stage names in canonical order.
    pub const ALL: [&str; 13] = [
        PREREQUISITE_CHECK,
        STALE_CLEANUP,
        NAMESPACE_ENSURE,
        SOURCE_PREPARE,
        SCAN_SETUP,
        TEST_EXECUTION,
        QUALITY_GATE,
        IMAGE_PUBLISH,
        DATABASE_PROVISION,
        SERVICE_DEPLOY,
        INGRESS_PROVISION,
        CONVERGENCE_VERIFY,
        TEARDOWN,
    ];
}

/// Builds the canonical stage list with dependencies.
#[must_use]
pub fn canonical(config: &DeployConfig) -> Vec<StageSpec> {
    use names::*;

    vec![
        StageSpec::new(Arc::new(PrerequisiteCheck)),
        StageSpec::new(Arc::new(StaleCleanup)).with_dependencies([PREREQUISITE_CHECK]),
        StageSpec::new(Arc::new(NamespaceEnsure)).with_dependencies([PREREQUISITE_CHECK]),
        StageSpec::new(Arc::new(SourcePrepare)).with_dependencies([PREREQUISITE_CHECK]),
        StageSpec::new(Arc::new(ScanSetup)).with_dependencies([NAMESPACE_ENSURE]),
        StageSpec::new(Arc::new(TestExecution)).with_dependencies([SOURCE_PREPARE]),
        StageSpec::new(Arc::new(QualityGate::new(config.gate_policy)))
            .with_dependencies([TEST_EXECUTION, SCAN_SETUP]),
        StageSpec::new(Arc::new(ImagePublish)).with_dependencies([SOURCE_PREPARE, TEST_EXECUTION]),
        StageSpec::new(Arc::new(DatabaseProvision)).with_dependencies([NAMESPACE_ENSURE]),
        StageSpec::new(Arc::new(ServiceDeploy))
            .with_dependencies([IMAGE_PUBLISH, DATABASE_PROVISION]),
        StageSpec::new(Arc::new(IngressProvision)).with_dependencies([SERVICE_DEPLOY]),
        StageSpec::new(Arc::new(ConvergenceVerify))
            .with_dependencies([SERVICE_DEPLOY, INGRESS_PROVISION]),
        StageSpec::new(Arc::new(Teardown)),
    ]
}

/// Combines several verification results; converged only if all did.
fn merge_results(results: Vec<VerifyResult>) -> Option<VerifyResult> {
    let mut iter = results.into_iter();
    let mut merged = iter.next()?;
    for next in iter {
        merged.converged &= next.converged;
        merged.attempts_used += next.attempts_used;
        merged.last_observed.extend(next.last_observed);
        if merged.last_error.is_none() {
            merged.last_error = next.last_error;
        }
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Stage;

    #[test]
    fn test_canonical_order_and_names() {
        let specs = canonical(&DeployConfig::default());
        let order: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, names::ALL.to_vec());
    }

    #[test]
    fn test_canonical_fatality() {
        let specs = canonical(&DeployConfig::default());
        let non_fatal: Vec<&str> = specs
            .iter()
            .filter(|s| !s.stage.fatal_on_failure())
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(
            non_fatal,
            vec![names::STALE_CLEANUP, names::SCAN_SETUP, names::QUALITY_GATE]
        );
    }

    #[test]
    fn test_dependencies_only_point_backwards() {
        let specs = canonical(&DeployConfig::default());
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.dependencies {
                let pos = specs.iter().position(|s| &s.name == dep).unwrap();
                assert!(pos < i, "{} depends on later stage {}", spec.name, dep);
            }
        }
    }

    #[test]
    fn test_merge_results() {
        let ok = VerifyResult {
            converged: true,
            attempts_used: 1,
            last_observed: vec![],
            last_error: None,
        };
        let bad = VerifyResult {
            converged: false,
            attempts_used: 3,
            last_observed: vec![],
            last_error: Some("timeout".into()),
        };
        let merged = merge_results(vec![ok.clone(), bad]).unwrap();
        assert!(!merged.converged);
        assert_eq!(merged.attempts_used, 4);
        assert_eq!(merged.last_error.as_deref(), Some("timeout"));
        assert!(merge_results(vec![ok]).unwrap().converged);
        assert!(merge_results(vec![]).is_none());
    }

    #[test]
    fn test_stage_names_match_constants() {
        assert_eq!(PrerequisiteCheck.name(), names::PREREQUISITE_CHECK);
        assert_eq!(Teardown.name(), names::TEARDOWN);
    }
}
