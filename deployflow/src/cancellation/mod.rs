//! Structured cancellation and cleanup utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation of a run
//! - CleanupRegistry for LIFO release of run-scoped resources
//! - FailFastGroup for independent tasks that abort together

mod cleanup;
mod task_group;
mod token;

pub use cleanup::{CleanupRegistry, ReleaseFailure};
pub use task_group::FailFastGroup;
pub use token::CancellationToken;
