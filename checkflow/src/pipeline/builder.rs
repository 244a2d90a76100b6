//! Pipeline builder with validation.

use super::{Pipeline, StageSpec};
use crate::config::{ExecutorConfig, DEFAULT_INPUT_KEY};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    input_key: String,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            stages: Vec::new(),
        }
    }

    /// Creates a builder using the input key from an executor config.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &ExecutorConfig) -> Self {
        Self::new(name).input_key(config.input_key.clone())
    }

    /// Sets the key the triggering input is recorded under.
    #[must_use]
    pub fn input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (duplicate name or output,
    /// unknown input, reserved name).
    pub fn stage(
        mut self,
        name: impl Into<String>,
        output_key: impl Into<String>,
        runner: Arc<dyn Stage>,
        inputs: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(name, output_key, runner).with_inputs(inputs.iter().copied());
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Appends a fully configured stage.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        check_stage(&self.input_key, &self.stages, &spec)?;
        self.stages.push(spec);
        Ok(())
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or the stages do not
    /// validate against the final input key.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                ));
        }
        if self.input_key.trim().is_empty() {
            return Err(PipelineValidationError::new("Input key cannot be empty")
                .with_error_info(ContractErrorInfo::new(
                    "PIPELINE-EMPTY-NAME",
                    "The input key must be non-empty",
                )));
        }

        // The input key may have changed after stages were added.
        for (i, spec) in self.stages.iter().enumerate() {
            check_stage(&self.input_key, &self.stages[..i], spec)?;
        }

        Ok(Pipeline::new(self.name, self.input_key, self.stages))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

fn check_stage(
    input_key: &str,
    earlier: &[StageSpec],
    spec: &StageSpec,
) -> Result<(), PipelineValidationError> {
    spec.validate()?;

    if spec.name == input_key || spec.output_key == input_key {
        return Err(PipelineValidationError::new(format!(
            "Stage '{}' collides with the input key '{input_key}'",
            spec.name
        ))
        .with_stages(vec![spec.name.clone()])
        .with_error_info(
            ContractErrorInfo::new(
                "PIPELINE-INPUT-KEY-COLLISION",
                "The input key is reserved for the triggering input",
            )
            .with_fix_hint("Rename the stage or its output key, or choose another input key."),
        ));
    }

    if let Some(existing) = earlier.iter().find(|s| s.name == spec.name) {
        return Err(PipelineValidationError::new(format!(
            "Duplicate stage name '{}'",
            spec.name
        ))
        .with_stages(vec![existing.name.clone()])
        .with_error_info(ContractErrorInfo::new(
            "PIPELINE-DUPLICATE-STAGE",
            "Stage names must be unique within a pipeline",
        )));
    }

    if let Some(existing) = earlier.iter().find(|s| s.output_key == spec.output_key) {
        return Err(PipelineValidationError::new(format!(
            "Stages '{}' and '{}' both write '{}'",
            existing.name, spec.name, spec.output_key
        ))
        .with_stages(vec![existing.name.clone(), spec.name.clone()])
        .with_error_info(
            ContractErrorInfo::new(
                "PIPELINE-DUPLICATE-OUTPUT",
                "Output keys must be unique across a pipeline's stages",
            )
            .with_fix_hint("Give each stage its own output key."),
        ));
    }

    let available: HashSet<&str> = earlier
        .iter()
        .map(|s| s.output_key.as_str())
        .chain(std::iter::once(input_key))
        .collect();
    if let Some(missing) = spec.inputs.iter().find(|i| !available.contains(i.as_str())) {
        return Err(PipelineValidationError::new(format!(
            "Stage '{}' reads '{missing}', which no earlier stage produces",
            spec.name
        ))
        .with_stages(vec![spec.name.clone()])
        .with_error_info(
            ContractErrorInfo::new(
                "PIPELINE-UNKNOWN-INPUT",
                format!("Input '{missing}' is not produced before this stage"),
            )
            .with_fix_hint("Declare the producing stage earlier in the pipeline."),
        ));
    }

    Ok(())
}
