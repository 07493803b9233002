//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types shared by the engine:
//! - Stage, run and pipeline status enums
//! - Stage outcomes recorded in the run report
//! - Run events emitted to event sinks

mod event;
mod outcome;
mod status;

pub use event::RunEvent;
pub use outcome::StageOutcome;
pub use status::{PipelineState, RunStatus, StageStatus};
