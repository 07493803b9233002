//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications with dependency edges
//! - A validating builder
//! - Named pipeline modes
//! - The sequential driver and its run report

mod builder;
mod mode;
mod report;
mod runner;
mod spec;


pub use builder::PipelineBuilder;
pub use mode::PipelineMode;
pub use report::RunReport;
pub use runner::{Pipeline, CANONICAL_NAME};
pub use spec::StageSpec;
