//! Assertions over run reports.

use crate::core::{PipelineState, StageStatus};
use crate::pipeline::RunReport;

/// Asserts that `stage` resolved with `expected`.
pub fn assert_stage_status(report: &RunReport, stage: &str, expected: StageStatus) {
    let outcome = report
        .outcome(stage)
        .unwrap_or_else(|| panic!("no outcome for stage '{stage}' in {:?}", report.statuses()));
    assert_eq!(
        outcome.status, expected,
        "stage '{stage}': expected {expected}, got {} ({})",
        outcome.status, outcome.message
    );
}

/// Asserts that the run completed without a failed stage.
pub fn assert_completed(report: &RunReport) {
    assert_eq!(
        report.state,
        PipelineState::Completed,
        "run did not complete:\n{}",
        report.render()
    );
    assert_eq!(report.exit_code(), 0, "\n{}", report.render());
}

/// Asserts that the run halted at `stage`, with every later stage skipped.
pub fn assert_halted_at(report: &RunReport, stage: &str) {
    match &report.state {
        PipelineState::Halted { stage: halted, .. } => assert_eq!(halted, stage),
        other => panic!("expected halt at '{stage}', got {other}:\n{}", report.render()),
    }
    let position = report
        .outcomes
        .iter()
        .position(|o| o.stage_name == stage)
        .unwrap_or_else(|| panic!("no outcome for stage '{stage}'"));
    for later in &report.outcomes[position + 1..] {
        assert_eq!(
            later.status,
            StageStatus::Skipped,
            "stage '{}' ran after the halt",
            later.stage_name
        );
    }
    assert_ne!(report.exit_code(), 0);
}

/// Asserts that exactly the listed stages failed.
pub fn assert_failed_stages(report: &RunReport, expected: &[&str]) {
    let failed: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| o.status == StageStatus::Failed)
        .map(|o| o.stage_name.as_str())
        .collect();
    assert_eq!(failed, expected, "\n{}", report.render());
}
