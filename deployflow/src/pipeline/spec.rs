//! Stage specifications.

use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use std::sync::Arc;

/// A stage plus the names of the stages it depends on.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The stage name, taken from the stage.
    pub name: String,
    /// The stage implementation.
    pub stage: Arc<dyn Stage>,
    /// Names of earlier stages this one depends on, in declaration order.
    pub dependencies: Vec<String>,
}

impl StageSpec {
    /// Creates a spec with no dependencies.
    #[must_use]
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            name: stage.name().to_string(),
            stage,
            dependencies: Vec::new(),
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Validates the spec on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("stage name cannot be empty"));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(PipelineValidationError::new(format!(
                "stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages([self.name.clone()]));
        }
        Ok(())
    }
}
