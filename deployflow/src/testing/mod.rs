//! Testing utilities for deployflow pipelines.
//!
//! This module provides:
//! - Recording stubs for every external port
//! - A scripted stage for driver tests
//! - A harness that wires them to an in-memory cluster
//! - Assertions over run reports
//!
//! The stubs also back `--dry-run` in the command-line tool.

mod assertions;
mod harness;
mod stages;
mod stubs;

pub use assertions::{assert_completed, assert_failed_stages, assert_halted_at, assert_stage_status};
pub use harness::TestHarness;
pub use stages::ScriptedStage;
pub use stubs::{
    CountingForwarder, ScriptedScanner, StubRegistry, StubSource, StubTestRunner, StubToolchain,
};
