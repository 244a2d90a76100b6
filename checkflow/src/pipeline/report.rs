//! Results and options of a single executor invocation.

use crate::cancellation::CancellationToken;
use crate::context::{Checkpoint, RunIdentity};
use crate::errors::{StageFailure, UnknownCheckpointError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage has output; `output` is the last stage's.
    Completed {
        /// The final stage's output.
        output: Value,
    },
    /// A stage failed; the run is parked at the failure's checkpoint.
    Failed(StageFailure),
    /// The invocation was cancelled.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// A warning raised during an invocation that did not stop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The persisted checkpoint was not recognised; the run restarted.
    UnknownCheckpoint(UnknownCheckpointError),
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCheckpoint(err) => write!(f, "{err}"),
        }
    }
}

/// What one executor invocation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run that was driven.
    pub identity: RunIdentity,
    /// Unique ID of this invocation, for log correlation.
    pub invocation_id: Uuid,
    /// How the invocation ended.
    pub outcome: RunOutcome,
    /// The persisted checkpoint when the invocation returned.
    pub checkpoint: Checkpoint,
    /// Stages that ran successfully in this invocation.
    pub executed: Vec<String>,
    /// Stages whose stored output was used instead of running them, both
    /// those behind the starting checkpoint and those skipped on the way.
    pub skipped: Vec<String>,
    /// Non-fatal problems.
    pub warnings: Vec<RunWarning>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// Returns true if the run is complete.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    /// The final output, if the run completed.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            RunOutcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    /// The stage failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.outcome {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Log every stage's context snapshot at debug level.
    pub dump_context: bool,
    /// Token that aborts the invocation when cancelled.
    pub cancellation: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the context dump.
    #[must_use]
    pub fn with_context_dump(mut self, enabled: bool) -> Self {
        self.dump_context = enabled;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }
}
