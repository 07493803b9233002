//! Sequential pipeline driver.

use super::{PipelineBuilder, PipelineMode, RunReport, StageSpec};
use crate::config::DeployConfig;
use crate::context::RunContext;
use crate::core::{PipelineState, RunEvent, StageOutcome};
use crate::errors::{DeployflowError, PipelineValidationError, Result};
use crate::stages::catalog;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, warn};

/// Time allowed for each scoped resource to release at the end of a run.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline used when the budget is too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Name of pipelines built from the stage catalog.
pub const CANONICAL_NAME: &str = "deployflow";

/// A validated, ordered stage list.
///
/// Stages run strictly one after another in list order. A fatal failure
/// halts the pipeline; every later stage is reported as skipped.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    mode: Option<PipelineMode>,
    stages: Vec<StageSpec>,
}

/// How one dispatched stage resolved before outcome mapping.
enum Resolution {
    Done(String),
    Skipped,
}

impl Pipeline {
    pub(crate) fn from_parts(
        name: String,
        mode: Option<PipelineMode>,
        stages: Vec<StageSpec>,
    ) -> Self {
        Self { name, mode, stages }
    }

    /// Every catalog stage, teardown included.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog does not validate.
    pub fn canonical(config: &DeployConfig) -> Result<Self, PipelineValidationError> {
        PipelineBuilder::new(CANONICAL_NAME)
            .extend(catalog::canonical(config))?
            .build()
    }

    /// The catalog stages selected by `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog does not validate.
    pub fn for_mode(
        config: &DeployConfig,
        mode: PipelineMode,
    ) -> Result<Self, PipelineValidationError> {
        let mut pipeline = PipelineBuilder::new(CANONICAL_NAME)
            .extend(catalog::canonical(config))?
            .select(&mode.stage_names())?
            .build()?;
        pipeline.mode = Some(mode);
        Ok(pipeline)
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mode the pipeline was selected with.
    #[must_use]
    pub fn mode(&self) -> Option<PipelineMode> {
        self.mode
    }

    /// Stage specs in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs every stage and returns the report.
    ///
    /// Never fails: stage errors are recorded as outcomes. Scoped resources
    /// registered during the run are released before returning, whatever the
    /// final state.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let run_id = ctx.run_id().to_string();
        let started_at = Utc::now();
        let budget = ctx.config.timeout_budget();
        let deadline = deadline_after(budget);

        info!(
            run_id = %run_id,
            pipeline = %self.name,
            stages = self.stages.len(),
            "run started"
        );
        ctx.events
            .emit(&RunEvent::RunStarted {
                run_id: run_id.clone(),
                mode: self.mode.map_or_else(|| "custom".to_string(), |m| m.to_string()),
                stages: self.stage_names().into_iter().map(String::from).collect(),
                at: started_at,
            })
            .await;

        {
            let (run_id, pipeline) = (run_id.clone(), self.name.clone());
            ctx.cancel.on_cancel(move || {
                warn!(run_id = %run_id, pipeline = %pipeline, "cancellation requested");
            });
        }

        let mut state = PipelineState::NotStarted;
        let mut outcomes = Vec::with_capacity(self.stages.len());

        for (index, spec) in self.stages.iter().enumerate() {
            let outcome = if let PipelineState::Halted { stage, .. } = &state {
                StageOutcome::skipped(
                    &spec.name,
                    format!("not attempted: pipeline halted at {stage}"),
                )
            } else {
                state = PipelineState::Advancing;
                let outcome = self.dispatch(spec, index, ctx, deadline, budget).await;
                if outcome.status.is_failure() {
                    state = PipelineState::Halted {
                        stage: spec.name.clone(),
                        reason: outcome.message.clone(),
                    };
                }
                outcome
            };

            ctx.events
                .emit(&RunEvent::StageFinished {
                    outcome: outcome.clone(),
                })
                .await;
            outcomes.push(outcome);
        }

        if !state.is_halted() {
            state = PipelineState::Completed;
        }

        for failure in ctx.cleanup.release_all(RELEASE_TIMEOUT).await {
            warn!(resource = %failure.name, reason = %failure.reason, "release failed");
        }

        let report = RunReport::new(
            run_id.clone(),
            self.name.clone(),
            self.mode,
            started_at,
            state,
            outcomes,
        )
        .with_artifacts(ctx.artifacts.snapshot());

        info!(run_id = %run_id, overall = %report.overall, state = %report.state, "run finished");
        ctx.events
            .emit(&RunEvent::RunFinished {
                run_id,
                status: report.overall,
                at: report.finished_at,
            })
            .await;

        report
    }

    #[instrument(skip_all, fields(stage = %spec.name, index = index))]
    async fn dispatch(
        &self,
        spec: &StageSpec,
        index: usize,
        ctx: &RunContext,
        deadline: Instant,
        budget: Duration,
    ) -> StageOutcome {
        ctx.events
            .emit(&RunEvent::StageStarted {
                stage: spec.name.clone(),
                index,
            })
            .await;

        ctx.artifacts.mark_attempted(&spec.name);
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(DeployflowError::Cancelled(
                ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
            )),
            res = timeout_at(deadline, execute(spec, ctx)) => match res {
                Ok(res) => res,
                Err(_) => {
                    ctx.cancel.cancel("run deadline exceeded");
                    Err(DeployflowError::DeadlineExceeded(budget))
                }
            },
        };
        let elapsed = started.elapsed();

        match result {
            Ok(Resolution::Done(message)) => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "{message}");
                StageOutcome::succeeded(&spec.name, message, elapsed)
            }
            Ok(Resolution::Skipped) => {
                info!("precondition not met, skipping");
                StageOutcome::skipped(&spec.name, "precondition not met")
            }
            Err(err) if is_fatal(spec, &err) => {
                error!(kind = err.kind(), "{err}");
                StageOutcome::failed(&spec.name, err.to_string(), elapsed).with_error(&err)
            }
            Err(err) => {
                warn!(kind = err.kind(), "{err}");
                StageOutcome::warning(&spec.name, err.to_string(), elapsed).with_error(&err)
            }
        }
    }
}

fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Precondition, action, then verification.
async fn execute(spec: &StageSpec, ctx: &RunContext) -> Result<Resolution> {
    if !spec.stage.precondition(ctx).await? {
        return Ok(Resolution::Skipped);
    }

    let message = spec.stage.action(ctx).await?;

    if let Some(verified) = spec.stage.postcondition(ctx).await {
        if !verified.converged {
            return Err(DeployflowError::ConvergenceTimeout {
                subject: format!("{}: {}", spec.name, verified.summary()),
                attempts: verified.attempts_used,
            });
        }
    }

    Ok(Resolution::Done(message))
}

/// Cancellation and deadline expiry halt the run whatever the stage says.
fn is_fatal(spec: &StageSpec, err: &DeployflowError) -> bool {
    spec.stage.fatal_on_failure()
        || matches!(
            err,
            DeployflowError::Cancelled(_) | DeployflowError::DeadlineExceeded(_)
        )
}
