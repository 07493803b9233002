//! A configurable stage for driver tests.

use crate::context::RunContext;
use crate::errors::{DeployflowError, Result};
use crate::stages::Stage;
use crate::verify::VerifyResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A stage whose guard, action and verification are scripted.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    fatal: bool,
    precondition: bool,
    delay: Option<Duration>,
    converged: Option<bool>,
    error: Mutex<Option<DeployflowError>>,
    actions: AtomicUsize,
}

impl ScriptedStage {
    /// A fatal stage that succeeds.
    #[must_use]
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fatal: true,
            precondition: true,
            delay: None,
            converged: None,
            error: Mutex::new(None),
            actions: AtomicUsize::new(0),
        }
    }

    /// A fatal stage whose first action fails with `error`.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: DeployflowError) -> Self {
        let stage = Self::ok(name);
        *stage.error.lock() = Some(error);
        stage
    }

    /// Makes failures advisory.
    #[must_use]
    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    /// Sets the precondition verdict.
    #[must_use]
    pub fn with_precondition(mut self, holds: bool) -> Self {
        self.precondition = holds;
        self
    }

    /// Sleeps before acting.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports a failed verification after acting.
    #[must_use]
    pub fn unconverged(mut self) -> Self {
        self.converged = Some(false);
        self
    }

    /// Number of actions run.
    #[must_use]
    pub fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn fatal_on_failure(&self) -> bool {
        self.fatal
    }

    async fn precondition(&self, _ctx: &RunContext) -> Result<bool> {
        Ok(self.precondition)
    }

    async fn action(&self, _ctx: &RunContext) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.actions.fetch_add(1, Ordering::SeqCst);
        match self.error.lock().take() {
            Some(err) => Err(err),
            None => Ok(format!("{} done", self.name)),
        }
    }

    async fn postcondition(&self, _ctx: &RunContext) -> Option<VerifyResult> {
        self.converged.map(|converged| VerifyResult {
            converged,
            attempts_used: 3,
            last_observed: Vec::new(),
            last_error: None,
        })
    }
}
