//! Per-run execution context.
//!
//! This module provides:
//! - [`RunContext`], the collaborators and settings every stage receives
//! - [`RunArtifacts`], values stages hand to later stages within one run

mod artifacts;
mod run;

pub use artifacts::{ArtifactSnapshot, RunArtifacts};
pub use run::RunContext;
