//! Stage, run and pipeline status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage within one run.
///
/// A stage moves `Pending -> Running -> {Succeeded, SucceededWithWarning,
/// Failed}`. Stages never dispatched (because the pipeline halted, or because
/// their precondition did not hold) resolve as `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting to be dispatched.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Action and verification completed.
    Succeeded,
    /// Action completed but a non-fatal check did not pass.
    SucceededWithWarning,
    /// Stage failed.
    Failed,
    /// Stage was not attempted.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithWarning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::SucceededWithWarning | Self::Failed | Self::Skipped
        )
    }

    /// Returns true if the stage's action ran to completion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededWithWarning)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Overall terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every attempted stage succeeded cleanly.
    Success,
    /// The run completed but at least one stage recorded a warning.
    PartialSuccess,
    /// A fatal stage failed and the pipeline halted.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// State of the pipeline driver itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    /// No stage dispatched yet.
    #[default]
    NotStarted,
    /// Stages are being dispatched.
    Advancing,
    /// A fatal stage failed; no further stages are dispatched.
    Halted {
        /// The stage that halted the pipeline.
        stage: String,
        /// Why it failed.
        reason: String,
    },
    /// The last stage resolved.
    Completed,
}

impl PipelineState {
    /// Returns true once the pipeline can no longer advance.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Halted { .. } | Self::Completed)
    }

    /// Returns true if the pipeline halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Advancing => write!(f, "advancing"),
            Self::Halted { stage, .. } => write!(f, "halted at {stage}"),
            Self::Completed => write!(f, "completed"),
        }
    }
}
