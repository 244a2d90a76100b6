//! Stage descriptors and the validated pipeline definition.

use super::RetryConfig;
use crate::context::{Checkpoint, COMPLETE, START};
use crate::errors::{ContractErrorInfo, PipelineValidationError, UnknownCheckpointError};
use crate::stages::Stage;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage. Also its checkpoint name.
    pub name: String,
    /// The context key the stage populates.
    pub output_key: String,
    /// Context keys the stage reads.
    pub inputs: Vec<String>,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Per-attempt time limit, overriding the executor default.
    pub timeout: Option<Duration>,
    /// Retry policy, overriding the executor default.
    pub retry: Option<RetryConfig>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        runner: Arc<dyn Stage>,
    ) -> Self {
        Self {
            name: name.into(),
            output_key: output_key.into(),
            inputs: Vec::new(),
            runner,
            timeout: None,
            retry: None,
        }
    }

    /// Sets the declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a declared input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        let input = input.into();
        if !self.inputs.contains(&input) {
            self.inputs.push(input);
        }
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or reserved names, an empty output key, or
    /// a stage that reads its own output.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty")
                .with_error_info(ContractErrorInfo::new(
                    "PIPELINE-EMPTY-NAME",
                    "Stage names must be non-empty",
                )));
        }
        if self.name == START || self.name == COMPLETE {
            return Err(PipelineValidationError::new(format!(
                "Stage name '{}' is reserved",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "PIPELINE-RESERVED-NAME",
                    "'start' and 'complete' are checkpoint sentinels",
                )
                .with_fix_hint("Rename the stage."),
            ));
        }
        if self.output_key.trim().is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has an empty output key",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-EMPTY-NAME",
                "Output keys must be non-empty",
            )));
        }
        if self.inputs.contains(&self.output_key) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot read its own output '{}'",
                self.name, self.output_key
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-SELF-INPUT",
                "A stage cannot depend on itself",
            )));
        }
        Ok(())
    }
}

/// A validated, ordered list of stages.
///
/// The checkpoint sequence is `start`, each stage name in order, then
/// `complete`. Shared read-only across runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    input_key: String,
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub(super) fn new(name: String, input_key: String, stages: Vec<StageSpec>) -> Self {
        Self {
            name,
            input_key,
            stages,
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context key the triggering input is recorded under.
    #[must_use]
    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    /// The stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Position of the named stage.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == stage)
    }

    /// Maps a checkpoint onto the index of the next stage to run.
    ///
    /// `start` is 0, a stage is its position and `complete` is `len()`.
    /// Returns `None` for a stage name this pipeline does not declare.
    #[must_use]
    pub fn ordinal(&self, checkpoint: &Checkpoint) -> Option<usize> {
        match checkpoint {
            Checkpoint::Start => Some(0),
            Checkpoint::Stage(name) => self.position(name),
            Checkpoint::Complete => Some(self.stages.len()),
        }
    }

    /// Like [`ordinal`](Self::ordinal) but describes why a checkpoint is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCheckpointError`] for an undeclared stage name.
    pub fn resolve(&self, checkpoint: &Checkpoint) -> Result<usize, UnknownCheckpointError> {
        self.ordinal(checkpoint).ok_or_else(|| {
            UnknownCheckpointError::new(
                &self.name,
                checkpoint.as_str(),
                "no stage with this name in the pipeline",
            )
        })
    }

    /// The checkpoint a run moves to once the stage at `index` has output.
    #[must_use]
    pub fn checkpoint_after(&self, index: usize) -> Checkpoint {
        self.stages
            .get(index + 1)
            .map_or(Checkpoint::Complete, |next| Checkpoint::stage(&next.name))
    }

    /// The output key of the last stage.
    #[must_use]
    pub fn final_output_key(&self) -> Option<&str> {
        self.stages.last().map(|s| s.output_key.as_str())
    }

    /// Output keys present in `values`, in stage order.
    #[must_use]
    pub fn completed_outputs<'a>(&'a self, values: &Map<String, Value>) -> Vec<&'a str> {
        self.stages
            .iter()
            .filter(|s| values.contains_key(&s.output_key))
            .map(|s| s.output_key.as_str())
            .collect()
    }

    /// The output of the furthest stage that has one.
    #[must_use]
    pub fn latest_output<'v>(&self, values: &'v Map<String, Value>) -> Option<(&str, &'v Value)> {
        self.stages
            .iter()
            .rev()
            .find_map(|s| values.get(&s.output_key).map(|v| (s.name.as_str(), v)))
    }
}
