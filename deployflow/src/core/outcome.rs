//! Per-stage outcome recorded in the run report.

use super::StageStatus;
use crate::errors::DeployflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The resolved result of one stage in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage_name: String,
    /// Terminal status.
    pub status: StageStatus,
    /// Human-readable explanation.
    pub message: String,
    /// Observed duration in milliseconds.
    pub duration_ms: f64,
    /// Classification of the error behind a warning or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl StageOutcome {
    fn new(
        stage_name: impl Into<String>,
        status: StageStatus,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            status,
            message: message.into(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            error_kind: None,
        }
    }

    /// A clean success.
    #[must_use]
    pub fn succeeded(
        stage: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::new(stage, StageStatus::Succeeded, message, duration)
    }

    /// A success with an advisory warning.
    #[must_use]
    pub fn warning(
        stage: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::new(stage, StageStatus::SucceededWithWarning, message, duration)
    }

    /// A failure.
    #[must_use]
    pub fn failed(
        stage: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::new(stage, StageStatus::Failed, message, duration)
    }

    /// A stage that was never dispatched.
    #[must_use]
    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(stage, StageStatus::Skipped, reason, Duration::ZERO)
    }

    /// Records the error classification.
    #[must_use]
    pub fn with_error(mut self, err: &DeployflowError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self
    }

    /// Records an explicit error classification.
    #[must_use]
    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let ok = StageOutcome::succeeded("namespace-ensure", "applied", Duration::from_millis(12));
        assert_eq!(ok.status, StageStatus::Succeeded);
        assert!((ok.duration_ms - 12.0).abs() < f64::EPSILON);
        assert!(ok.error_kind.is_none());

        let skipped = StageOutcome::skipped("ingress-provision", "not attempted");
        assert_eq!(skipped.status, StageStatus::Skipped);
        assert!(skipped.duration_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn test_outcome_with_error() {
        let err = DeployflowError::tool("docker", "exit status 1");
        let failed = StageOutcome::failed("image-publish", err.to_string(), Duration::ZERO)
            .with_error(&err);
        assert_eq!(failed.error_kind.as_deref(), Some("external_tool_failure"));
    }

    #[test]
    fn test_outcome_serialization_omits_empty_error() {
        let ok = StageOutcome::succeeded("a", "done", Duration::ZERO);
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error_kind").is_none());
        assert_eq!(json["status"], "succeeded");
    }
}
