//! # Deployflow
//!
//! Idempotent deployment-lifecycle orchestration for containerized
//! applications on Kubernetes.
//!
//! Deployflow runs an ordered list of guarded stages against a cluster:
//!
//! - **Declarative resources**: immutable descriptors applied idempotently
//! - **Bounded verification**: every mutation is followed by a polled
//!   convergence check with an explicit attempt budget
//! - **Halting semantics**: a fatal failure stops the run and every later
//!   stage is reported as skipped
//! - **Scoped resources**: forwards and other handles acquired during a run
//!   are released when it ends, whatever the outcome
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let config = DeployConfig::load(None)?;
//! let credentials = Credentials::from_env(&config);
//! let pipeline = Pipeline::for_mode(&config, PipelineMode::FullInstall)?;
//!
//! let ctx = RunContext::new(config, credentials, Arc::new(KubectlClient::new()), ports);
//! let report = pipeline.run(&ctx).await;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    missing_docs,
    rust_2018_idioms
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod cluster;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
mod process;
pub mod resources;
pub mod stages;
pub mod testing;
pub mod verify;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry, FailFastGroup};
    pub use crate::cluster::{ClusterClient, InMemoryCluster, KubectlClient, ObservedObject};
    pub use crate::config::{Credentials, DeployConfig, GatePolicy};
    pub use crate::context::RunContext;
    pub use crate::core::{PipelineState, RunEvent, RunStatus, StageOutcome, StageStatus};
    pub use crate::errors::{ClusterError, DeployflowError, PipelineValidationError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineMode, RunReport, StageSpec};
    pub use crate::resources::{ResourceDescriptor, ResourceKind, Selector};
    pub use crate::stages::{Ports, Stage};
    pub use crate::verify::{RetryPolicy, Verifier, VerifyResult};
    pub use std::sync::Arc;
}
