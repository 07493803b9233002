//! The terminal report of a run.

use super::PipelineMode;
use crate::context::ArtifactSnapshot;
use crate::core::{PipelineState, RunStatus, StageOutcome, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// Pipeline name.
    pub pipeline: String,
    /// Mode the pipeline was selected with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PipelineMode>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Final driver state.
    pub state: PipelineState,
    /// Overall status.
    pub overall: RunStatus,
    /// One outcome per scheduled stage, in order.
    pub outcomes: Vec<StageOutcome>,
    /// Values the stages produced.
    #[serde(default)]
    pub artifacts: ArtifactSnapshot,
}

impl RunReport {
    pub(crate) fn new(
        run_id: String,
        pipeline: String,
        mode: Option<PipelineMode>,
        started_at: DateTime<Utc>,
        state: PipelineState,
        outcomes: Vec<StageOutcome>,
    ) -> Self {
        let overall = overall_status(&state, &outcomes);
        Self {
            run_id,
            pipeline,
            mode,
            started_at,
            finished_at: Utc::now(),
            state,
            overall,
            outcomes,
            artifacts: ArtifactSnapshot::default(),
        }
    }

    #[must_use]
    pub(crate) fn with_artifacts(mut self, artifacts: ArtifactSnapshot) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Process exit code: zero only for a completed run with no failed stage.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let failed = self.outcomes.iter().any(|o| o.status == StageStatus::Failed);
        if matches!(self.state, PipelineState::Completed) && !failed {
            0
        } else {
            1
        }
    }

    /// The outcome of a named stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage_name == stage)
    }

    /// `(stage, status)` pairs in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(&str, StageStatus)> {
        self.outcomes
            .iter()
            .map(|o| (o.stage_name.as_str(), o.status))
            .collect()
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable table.
    #[must_use]
    pub fn render(&self) -> String {
        let width = self
            .outcomes
            .iter()
            .map(|o| o.stage_name.len())
            .max()
            .unwrap_or(5)
            .max(5);

        let mut out = String::new();
        let _ = writeln!(out, "run {} ({})", self.run_id, self.pipeline);
        let _ = writeln!(out, "{:<width$}  {:<9}  {:>9}  message", "stage", "status", "ms");
        for o in &self.outcomes {
            let _ = writeln!(
                out,
                "{:<width$}  {:<9}  {:>9.1}  {}",
                o.stage_name,
                o.status.to_string(),
                o.duration_ms,
                o.message
            );
        }
        if let Some(analysis) = &self.artifacts.report {
            let task = analysis.task_id.as_deref().unwrap_or("-");
            let _ = writeln!(out, "quality analysis: {} (task {task})", analysis.project_key);
        }
        let _ = write!(out, "result: {} ({})", self.overall, self.state);
        out
    }
}

fn overall_status(state: &PipelineState, outcomes: &[StageOutcome]) -> RunStatus {
    if state.is_halted() {
        RunStatus::Aborted
    } else if outcomes
        .iter()
        .any(|o| o.status == StageStatus::SucceededWithWarning)
    {
        RunStatus::PartialSuccess
    } else {
        RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn report(state: PipelineState, outcomes: Vec<StageOutcome>) -> RunReport {
        RunReport::new("r1".into(), "deploy".into(), None, Utc::now(), state, outcomes)
    }

    #[test]
    fn test_overall_success() {
        let r = report(
            PipelineState::Completed,
            vec![
                StageOutcome::succeeded("a", "ok", Duration::from_millis(3)),
                StageOutcome::skipped("b", "precondition not met"),
            ],
        );
        assert_eq!(r.overall, RunStatus::Success);
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn test_warning_is_partial_success() {
        let r = report(
            PipelineState::Completed,
            vec![StageOutcome::warning("gate", "quality gate failed", Duration::ZERO)],
        );
        assert_eq!(r.overall, RunStatus::PartialSuccess);
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn test_halted_is_aborted() {
        let r = report(
            PipelineState::Halted {
                stage: "a".into(),
                reason: "boom".into(),
            },
            vec![
                StageOutcome::failed("a", "boom", Duration::ZERO),
                StageOutcome::skipped("b", "not attempted"),
            ],
        );
        assert_eq!(r.overall, RunStatus::Aborted);
        assert_eq!(r.exit_code(), 1);
        assert_eq!(
            r.statuses(),
            vec![("a", StageStatus::Failed), ("b", StageStatus::Skipped)]
        );
    }

    #[test]
    fn test_render_and_json() {
        let r = report(
            PipelineState::Completed,
            vec![StageOutcome::succeeded("namespace-ensure", "applied", Duration::ZERO)],
        );
        let table = r.render();
        assert!(table.contains("namespace-ensure"));
        assert!(table.ends_with("result: success (completed)"));

        let json = r.to_json().unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome("namespace-ensure"), r.outcome("namespace-ensure"));
    }

    #[test]
    fn test_render_lists_quality_analysis() {
        let mut artifacts = ArtifactSnapshot::default();
        artifacts.report = Some(crate::stages::ReportHandle {
            project_key: "shop".into(),
            task_id: Some("AX1".into()),
        });
        let r = report(PipelineState::Completed, vec![]).with_artifacts(artifacts);

        assert!(r.render().contains("quality analysis: shop (task AX1)"));
        let back: RunReport = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(back.artifacts, r.artifacts);
    }
}
