//! Pipeline builder with validation.

use super::{Pipeline, StageSpec};
use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for validated pipelines.
///
/// Stages are kept in insertion order, which is also execution order. A
/// dependency must name a stage added earlier, so forward edges and cycles
/// cannot be expressed.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicates, self-dependencies, or dependencies
    /// on stages not yet added.
    pub fn stage(
        mut self,
        stage: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(stage).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Appends a stage spec.
    ///
    /// # Errors
    ///
    /// See [`PipelineBuilder::stage`].
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.iter().any(|s| s.name == spec.name) {
            return Err(PipelineValidationError::new(format!(
                "stage '{}' is listed twice",
                spec.name
            ))
            .with_stages([spec.name.clone()]));
        }

        for dep in &spec.dependencies {
            if !self.stages.iter().any(|s| &s.name == dep) {
                return Err(PipelineValidationError::new(format!(
                    "stage '{}' depends on unknown or later stage '{}'",
                    spec.name, dep
                ))
                .with_stages([spec.name.clone(), dep.clone()]));
            }
        }

        self.stages.push(spec);
        Ok(())
    }

    /// Appends many specs in order.
    ///
    /// # Errors
    ///
    /// Stops at the first invalid spec.
    pub fn extend<I>(mut self, specs: I) -> Result<Self, PipelineValidationError>
    where
        I: IntoIterator<Item = StageSpec>,
    {
        for spec in specs {
            self.add_stage_spec(spec)?;
        }
        Ok(self)
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no stages were added.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("pipeline has no stages"));
        }
        Ok(Pipeline::from_parts(self.name, None, self.stages))
    }

    /// Keeps only the named stages, preserving order.
    ///
    /// Dependencies on dropped stages are treated as satisfied externally.
    ///
    /// # Errors
    ///
    /// Returns an error if a name does not match any stage.
    pub fn select(mut self, names: &[&str]) -> Result<Self, PipelineValidationError> {
        let wanted: HashSet<&str> = names.iter().copied().collect();
        for name in &wanted {
            if !self.stages.iter().any(|s| s.name == *name) {
                return Err(PipelineValidationError::new(format!("unknown stage '{name}'"))
                    .with_stages([*name]));
            }
        }
        self.stages.retain(|s| wanted.contains(s.name.as_str()));
        let kept: HashSet<String> = self.stages.iter().map(|s| s.name.clone()).collect();
        for spec in &mut self.stages {
            spec.dependencies.retain(|d| kept.contains(d));
        }
        Ok(self)
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages added.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;

    fn stage(name: &str) -> Arc<dyn Stage> {
        Arc::new(ScriptedStage::ok(name))
    }

    #[test]
    fn test_builder_with_dependencies() {
        let builder = PipelineBuilder::new("deploy")
            .stage(stage("a"), &[])
            .unwrap()
            .stage(stage("b"), &["a"])
            .unwrap();
        assert_eq!(builder.name(), "deploy");
        assert_eq!(builder.stage_count(), 2);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = PipelineBuilder::new("deploy")
            .stage(stage("a"), &["missing"])
            .unwrap_err();
        assert_eq!(err.stages, vec!["a".to_string(), "missing".to_string()]);
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let mut builder = PipelineBuilder::new("deploy");
        let err = builder
            .add_stage_spec(StageSpec::new(stage("a")).with_dependency("b"))
            .unwrap_err();
        assert!(err.message.contains("later stage 'b'"));
    }

    #[test]
    fn test_self_dependency_and_duplicates_rejected() {
        assert!(PipelineBuilder::new("deploy").stage(stage("a"), &["a"]).is_err());

        let err = PipelineBuilder::new("deploy")
            .stage(stage("a"), &[])
            .unwrap()
            .stage(stage("a"), &[])
            .unwrap_err();
        assert!(err.message.contains("listed twice"));
    }

    #[test]
    fn test_empty_build_rejected() {
        assert!(PipelineBuilder::new("deploy").build().is_err());
    }

    #[test]
    fn test_select_drops_outside_dependencies() {
        let builder = PipelineBuilder::new("deploy")
            .stage(stage("a"), &[])
            .unwrap()
            .stage(stage("b"), &["a"])
            .unwrap()
            .stage(stage("c"), &["b"])
            .unwrap()
            .select(&["c", "b"])
            .unwrap();

        let pipeline = builder.build().unwrap();
        assert_eq!(pipeline.stage_names(), vec!["b", "c"]);
        assert!(pipeline.stages()[0].dependencies.is_empty());
        assert_eq!(pipeline.stages()[1].dependencies, vec!["b".to_string()]);

        assert!(PipelineBuilder::new("deploy")
            .stage(stage("a"), &[])
            .unwrap()
            .select(&["zzz"])
            .is_err());
    }
}
