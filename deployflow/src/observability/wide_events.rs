//! Wide events: one summary record per run.

use crate::core::{RunEvent, RunStatus, StageOutcome};
use crate::events::EventSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Event sink that folds a run into a single wide log record.
///
/// Stage outcomes are buffered and emitted together when the run finishes,
/// under the `deployflow::wide` target.
#[derive(Debug, Default)]
pub struct WideEventSink {
    runs: Mutex<BTreeMap<String, PendingRun>>,
    current: Mutex<Option<String>>,
}

#[derive(Debug, Default)]
struct PendingRun {
    mode: String,
    outcomes: Vec<StageOutcome>,
}

impl WideEventSink {
    /// Creates a sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the payload for one stage.
    #[must_use]
    pub fn build_stage_payload(outcome: &StageOutcome) -> Value {
        let mut payload = json!({
            "stage": outcome.stage_name,
            "status": outcome.status.to_string(),
            "duration_ms": outcome.duration_ms,
            "message": outcome.message,
        });
        if let Some(kind) = &outcome.error_kind {
            payload["error_kind"] = json!(kind);
        }
        payload
    }

    /// Builds the payload for a whole run.
    #[must_use]
    pub fn build_run_payload(
        run_id: &str,
        mode: &str,
        status: RunStatus,
        outcomes: &[StageOutcome],
    ) -> Value {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for o in outcomes {
            *counts.entry(o.status.to_string()).or_insert(0) += 1;
        }
        let total_ms: f64 = outcomes.iter().map(|o| o.duration_ms).sum();

        json!({
            "run_id": run_id,
            "mode": mode,
            "status": status.to_string(),
            "total_stage_ms": total_ms,
            "stage_counts": counts,
            "stages": outcomes.iter().map(Self::build_stage_payload).collect::<Vec<_>>(),
        })
    }

    fn record(&self, event: &RunEvent) -> Option<Value> {
        match event {
            RunEvent::RunStarted { run_id, mode, .. } => {
                self.runs.lock().insert(
                    run_id.clone(),
                    PendingRun {
                        mode: mode.clone(),
                        outcomes: Vec::new(),
                    },
                );
                *self.current.lock() = Some(run_id.clone());
                None
            }
            RunEvent::StageFinished { outcome } => {
                let current = self.current.lock().clone()?;
                if let Some(run) = self.runs.lock().get_mut(&current) {
                    run.outcomes.push(outcome.clone());
                }
                None
            }
            RunEvent::RunFinished { run_id, status, .. } => {
                let run = self.runs.lock().remove(run_id)?;
                Some(Self::build_run_payload(run_id, &run.mode, *status, &run.outcomes))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl EventSink for WideEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.try_emit(event);
    }

    fn try_emit(&self, event: &RunEvent) {
        if let Some(payload) = self.record(event) {
            tracing::info!(target: "deployflow::wide", payload = %payload, "run summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_run_payload_counts_statuses() {
        let sink = WideEventSink::new();
        sink.record(&RunEvent::RunStarted {
            run_id: "r1".into(),
            mode: "install".into(),
            stages: vec!["a".into(), "b".into()],
            at: Utc::now(),
        });
        for outcome in [
            StageOutcome::succeeded("a", "ok", Duration::from_millis(2)),
            StageOutcome::skipped("b", "precondition not met"),
        ] {
            assert!(sink.record(&RunEvent::StageFinished { outcome }).is_none());
        }

        let payload = sink
            .record(&RunEvent::RunFinished {
                run_id: "r1".into(),
                status: RunStatus::Success,
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(payload["mode"], "install");
        assert_eq!(payload["stage_counts"]["succeeded"], 1);
        assert_eq!(payload["stage_counts"]["skipped"], 1);
        assert_eq!(payload["stages"][0]["stage"], "a");
        assert!(sink.runs.lock().is_empty());
    }

    #[test]
    fn test_error_kind_included() {
        let outcome =
            StageOutcome::failed("a", "boom", Duration::ZERO).with_error_kind("unreachable");
        let payload = WideEventSink::build_stage_payload(&outcome);
        assert_eq!(payload["error_kind"], "unreachable");
    }
}
