//! Stage trait and the domain stage catalog.
//!
//! A stage is a named, idempotent unit of orchestration work: a guard
//! (precondition), an action, and an optional verification hook
//! (postcondition). Stages own no state between runs.

pub mod catalog;
mod ports;

pub use ports::{
    DashboardForwarder, ForwardHandle, GateStatus, ImageArtifact, ImageRegistry, Ports,
    QualityScanner, ReportHandle, SourceRepository, TestRunner, Toolchain,
};
#[cfg(test)]
pub use ports::{
    MockDashboardForwarder, MockImageRegistry, MockQualityScanner, MockSourceRepository,
    MockTestRunner, MockToolchain,
};

use crate::context::RunContext;
use crate::errors::Result;
use crate::verify::VerifyResult;
use async_trait::async_trait;
use std::fmt::Debug;

/// One guarded unit of orchestration work.
///
/// Every stage must be safe to re-run: recovery from a halted run is a
/// fresh run from the start.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Stable stage name.
    fn name(&self) -> &str;

    /// Whether a failure halts the pipeline.
    fn fatal_on_failure(&self) -> bool {
        true
    }

    /// Decides whether the stage runs. `Ok(false)` skips it.
    async fn precondition(&self, _ctx: &RunContext) -> Result<bool> {
        Ok(true)
    }

    /// Performs the work. Returns a short message for the report.
    async fn action(&self, ctx: &RunContext) -> Result<String>;

    /// Confirms convergence after the action. `None` means nothing to verify.
    async fn postcondition(&self, _ctx: &RunContext) -> Option<VerifyResult> {
        None
    }
}
