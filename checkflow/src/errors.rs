//! Error types for the checkflow framework.
//!
//! Conflicting inputs and missing runs are reported to callers as structured
//! values. Stage failures and cancellation are not errors at all: they come
//! back as a [`RunOutcome`](crate::pipeline::RunOutcome). Only store
//! durability failures abort an invocation.

use crate::config::ConfigError;
use crate::context::{Checkpoint, RunIdentity};
use crate::stages::StageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for checkflow operations.
#[derive(Debug, Error)]
pub enum CheckflowError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The run identity has never been seen by the store.
    #[error("Run not found: {0}")]
    NotFound(RunIdentity),

    /// The context store could not read or persist state.
    #[error("{0}")]
    Store(StoreError),

    /// A different input arrived while a run was mid-pipeline.
    #[error("{0}")]
    ConflictingInput(#[from] ConflictingInputError),

    /// There is nothing to resume for the run.
    #[error("{0}")]
    NoPendingRun(#[from] NoPendingRunError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CheckflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { identity } => Self::NotFound(identity),
            other => Self::Store(other),
        }
    }
}

impl CheckflowError {
    /// Returns the checkpoint the run is parked at, when the error carries one.
    #[must_use]
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Self::ConflictingInput(err) => Some(&err.checkpoint),
            Self::NoPendingRun(err) => Some(&err.checkpoint),
            _ => None,
        }
    }

    /// Returns true if the invocation cannot continue meaningfully.
    ///
    /// Everything else is a structured outcome that a front end reports back
    /// to the user.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Validation(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Returns a stable type name for the error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "PipelineValidation",
            Self::NotFound(_) => "NotFound",
            Self::Store(_) => "StoreFailure",
            Self::ConflictingInput(_) => "ConflictingInput",
            Self::NoPendingRun(_) => "NoPendingRun",
            Self::Config(_) => "Config",
            Self::Internal(_) => "Internal",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = match self {
            Self::ConflictingInput(err) => err.to_dict(),
            Self::Validation(err) => err.to_dict(),
            _ => HashMap::new(),
        };
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(checkpoint) = self.checkpoint() {
            map.insert("checkpoint".to_string(), serde_json::json!(checkpoint.as_str()));
        }
        map
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-DUPLICATE-OUTPUT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("stages".to_string(), serde_json::json!(self.stages));
        if let Some(ref info) = self.error_info {
            map.insert("code".to_string(), serde_json::json!(info.code));
            if let Some(ref hint) = info.fix_hint {
                map.insert("fix_hint".to_string(), serde_json::json!(hint));
            }
        }
        map
    }
}

/// Errors raised by a context store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The run identity is unknown to the store.
    #[error("Run not found: {identity}")]
    NotFound {
        /// The identity that was looked up.
        identity: RunIdentity,
    },

    /// Filesystem access failed.
    #[error("IO error while {context}: {source}")]
    Io {
        /// What the store was doing.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A context could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A persisted document is unreadable and no backup could replace it.
    #[error("Corrupt context for run {identity}: {reason}")]
    Corrupt {
        /// The affected run.
        identity: RunIdentity,
        /// Why the document was rejected.
        reason: String,
    },

    /// The store failed internally.
    #[error("Store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(identity: &RunIdentity) -> Self {
        Self::NotFound {
            identity: identity.clone(),
        }
    }

    /// Creates an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the run identity was unknown.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stage failed; the run stays positioned at `checkpoint`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("Stage '{stage}' failed at checkpoint '{checkpoint}' after {attempts} attempt(s): {error}")]
pub struct StageFailure {
    /// The stage that failed.
    pub stage: String,
    /// The checkpoint the run is parked at.
    pub checkpoint: Checkpoint,
    /// The stage error.
    pub error: StageError,
    /// How many attempts were made in this invocation.
    pub attempts: u32,
}

impl StageFailure {
    /// Creates a new stage failure record.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        checkpoint: Checkpoint,
        error: StageError,
        attempts: u32,
    ) -> Self {
        Self {
            stage: stage.into(),
            checkpoint,
            error,
            attempts,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("checkpoint".to_string(), serde_json::json!(self.checkpoint.as_str()));
        map.insert("error_kind".to_string(), serde_json::json!(self.error.kind.to_string()));
        map.insert("error".to_string(), serde_json::json!(self.error.message));
        map.insert("retryable".to_string(), serde_json::json!(self.error.retryable));
        map.insert("attempts".to_string(), serde_json::json!(self.attempts));
        map
    }
}

/// A persisted checkpoint that does not belong to the configured pipeline.
///
/// Never returned as an error: the executor restarts from the first stage and
/// attaches this to the run report.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("Unknown checkpoint '{checkpoint}' in pipeline '{pipeline}': {reason}")]
pub struct UnknownCheckpointError {
    /// The pipeline name.
    pub pipeline: String,
    /// The checkpoint as it was persisted.
    pub checkpoint: String,
    /// Why it was rejected.
    pub reason: String,
}

impl UnknownCheckpointError {
    /// Creates a new unknown checkpoint record.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        checkpoint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            checkpoint: checkpoint.into(),
            reason: reason.into(),
        }
    }
}

/// A new input arrived while a run was mid-pipeline with another input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "Run {identity} is in progress at checkpoint '{checkpoint}' with input '{recorded_input}'; \
     resume it or reset it before submitting a different input"
)]
pub struct ConflictingInputError {
    /// The affected run.
    pub identity: RunIdentity,
    /// Where the run is parked.
    pub checkpoint: Checkpoint,
    /// The input that started the in-flight attempt.
    pub recorded_input: String,
    /// The rejected input.
    pub submitted_input: String,
}

impl ConflictingInputError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("run".to_string(), serde_json::json!(self.identity.to_string()));
        map.insert("recorded_input".to_string(), serde_json::json!(self.recorded_input));
        map.insert("submitted_input".to_string(), serde_json::json!(self.submitted_input));
        map
    }
}

/// The run has nothing to resume.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No pending run for {identity} (checkpoint '{checkpoint}')")]
pub struct NoPendingRunError {
    /// The affected run.
    pub identity: RunIdentity,
    /// The checkpoint the run is at.
    pub checkpoint: Checkpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RunIdentity {
        RunIdentity::new("app", "user", "session")
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: CheckflowError = StoreError::not_found(&identity()).into();
        assert!(matches!(err, CheckflowError::NotFound(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_store_io_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CheckflowError = StoreError::io("writing context", io).into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_stage_failure_to_dict() {
        let failure = StageFailure::new(
            "review",
            Checkpoint::stage("review"),
            StageError::failed("upstream 500"),
            2,
        );
        let dict = failure.to_dict();

        assert_eq!(dict["checkpoint"], "review");
        assert_eq!(dict["stage"], "review");
        assert_eq!(dict["error"], "upstream 500");
        assert_eq!(dict["attempts"], 2);
    }

    #[test]
    fn test_no_pending_run_carries_checkpoint() {
        let err = CheckflowError::from(NoPendingRunError {
            identity: identity(),
            checkpoint: Checkpoint::Complete,
        });
        assert_eq!(err.kind(), "NoPendingRun");
        assert_eq!(err.checkpoint(), Some(&Checkpoint::Complete));
        assert_eq!(err.to_dict()["checkpoint"], "complete");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_conflicting_input_message() {
        let err = ConflictingInputError {
            identity: identity(),
            checkpoint: Checkpoint::stage("review"),
            recorded_input: "input X".to_string(),
            submitted_input: "input Y".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("review"));
        assert!(message.contains("input X"));

        let err = CheckflowError::from(err);
        assert_eq!(err.checkpoint(), Some(&Checkpoint::stage("review")));
        assert_eq!(err.kind(), "ConflictingInput");
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("duplicate")
            .with_stages(vec!["a".to_string()])
            .with_error_info(ContractErrorInfo::new("PIPELINE-DUPLICATE-STAGE", "dup"));

        assert_eq!(err.code(), Some("PIPELINE-DUPLICATE-STAGE"));
        assert_eq!(err.to_dict()["code"], "PIPELINE-DUPLICATE-STAGE");
    }
}
