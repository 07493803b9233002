//! Run events emitted to event sinks.

use super::{RunStatus, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lifecycle event emitted while a pipeline runs.
///
/// Events are consumed by [`crate::events::EventSink`] implementations for
/// logging, monitoring, or test assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run started.
    RunStarted {
        /// Run identifier.
        run_id: String,
        /// Pipeline mode name.
        mode: String,
        /// Stages scheduled for this run, in order.
        stages: Vec<String>,
        /// When the run started.
        at: DateTime<Utc>,
    },
    /// A stage moved to `Running`.
    StageStarted {
        /// Stage name.
        stage: String,
        /// Position within the run.
        index: usize,
    },
    /// A stage resolved.
    StageFinished {
        /// The recorded outcome.
        outcome: StageOutcome,
    },
    /// One poll attempt of a bounded wait.
    PollAttempt {
        /// What is being polled.
        subject: String,
        /// 1-based attempt number.
        attempt: u32,
        /// Whether the predicate held.
        converged: bool,
    },
    /// The run finished.
    RunFinished {
        /// Run identifier.
        run_id: String,
        /// Overall status.
        status: RunStatus,
        /// When the run finished.
        at: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Dotted event name, e.g. `stage.finished`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageFinished { .. } => "stage.finished",
            Self::PollAttempt { .. } => "poll.attempt",
            Self::RunFinished { .. } => "run.finished",
        }
    }

    /// The stage the event concerns, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage, .. } => Some(stage),
            Self::StageFinished { outcome } => Some(&outcome.stage_name),
            _ => None,
        }
    }
}
