//! The run controller.
//!
//! Decides what a request means for a run before handing it to the
//! executor: submit, resume, reset, or status. Every verb holds the run's
//! lock for its whole duration, so a reset can never interleave with an
//! in-flight invocation.

mod command;
mod status;


pub use command::Command;
pub use status::{RunStatus, StageProgress};

use crate::context::{Checkpoint, RunIdentity};
use crate::errors::{CheckflowError, ConflictingInputError, NoPendingRunError};
use crate::pipeline::{PipelineExecutor, RunOptions, RunOutcome, RunReport};
use crate::store::RunGuard;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// What a handled command produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerResponse {
    /// An executor invocation ran.
    Run(RunReport),
    /// The run's status.
    Status(RunStatus),
    /// The run was reset.
    Reset(RunStatus),
    /// The furthest completed stage's output.
    Output {
        /// The stage that produced it.
        stage: String,
        /// The value.
        value: Value,
    },
    /// No stage has produced output yet.
    NoOutput,
    /// The request was refused; the run is unchanged.
    Rejected {
        /// Stable error type name.
        kind: &'static str,
        /// Human-readable message.
        message: String,
        /// Where the run is parked, if known.
        checkpoint: Option<Checkpoint>,
    },
}

impl ControllerResponse {
    fn rejected(err: &CheckflowError) -> Self {
        Self::Rejected {
            kind: err.kind(),
            message: err.to_string(),
            checkpoint: err.checkpoint().cloned(),
        }
    }

    /// Returns true unless the request was refused or the run failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Run(report) => report.is_completed(),
            Self::Rejected { .. } => false,
            _ => true,
        }
    }
}

impl fmt::Display for ControllerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(report) => match &report.outcome {
                RunOutcome::Completed { output } => write!(f, "{}", display_value(output)),
                RunOutcome::Failed(failure) => write!(
                    f,
                    "{failure}\nSay 'resume workflow' to retry from '{}'.",
                    failure.checkpoint
                ),
                RunOutcome::Cancelled { reason } => write!(
                    f,
                    "Cancelled at checkpoint '{}': {reason}",
                    report.checkpoint
                ),
            },
            Self::Status(status) => write!(f, "{status}"),
            Self::Reset(status) => write!(f, "Workflow reset. Checkpoint: {}", status.checkpoint),
            Self::Output { value, .. } => write!(f, "{}", display_value(value)),
            Self::NoOutput => f.write_str("No output yet."),
            Self::Rejected { message, .. } => f.write_str(message),
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Front door for pipeline runs.
#[derive(Debug, Clone)]
pub struct RunController {
    executor: Arc<PipelineExecutor>,
}

impl RunController {
    /// Creates a controller owning `executor`.
    #[must_use]
    pub fn new(executor: PipelineExecutor) -> Self {
        Self::from_shared(Arc::new(executor))
    }

    /// Creates a controller over a shared executor.
    #[must_use]
    pub fn from_shared(executor: Arc<PipelineExecutor>) -> Self {
        Self { executor }
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    /// Submits `input` for `identity`.
    ///
    /// # Errors
    ///
    /// See [`submit_with`](Self::submit_with).
    pub async fn submit(
        &self,
        identity: &RunIdentity,
        input: &str,
    ) -> Result<RunReport, CheckflowError> {
        self.submit_with(identity, input, &RunOptions::default()).await
    }

    /// Submits `input` for `identity` with explicit options.
    ///
    /// The recorded input continues the run. A different input while the
    /// run is parked mid-pipeline is refused. A different input on a fresh or
    /// complete run clears it and starts over.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingInput` when refused, or a store error.
    pub async fn submit_with(
        &self,
        identity: &RunIdentity,
        input: &str,
        options: &RunOptions,
    ) -> Result<RunReport, CheckflowError> {
        let guard = self.executor.acquire(identity).await;
        let store = self.executor.store();
        let input_key = self.executor.pipeline().input_key();

        let existing = match store.read(identity).await {
            Ok(ctx) => Some(ctx),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(ctx) = existing {
            match ctx.input(input_key) {
                Some(recorded) if recorded == input => {}
                Some(recorded) if ctx.checkpoint.is_in_flight() => {
                    warn!(
                        run = %identity,
                        checkpoint = %ctx.checkpoint,
                        "Rejected submit with a different input while mid-pipeline"
                    );
                    return Err(ConflictingInputError {
                        identity: identity.clone(),
                        checkpoint: ctx.checkpoint.clone(),
                        recorded_input: recorded.to_string(),
                        submitted_input: input.to_string(),
                    }
                    .into());
                }
                Some(_) => {
                    info!(run = %identity, checkpoint = %ctx.checkpoint, "New input, starting a fresh run");
                    store.reset(identity).await?;
                    store
                        .apply(identity, input_key, json!(input), Checkpoint::Start)
                        .await?;
                }
                None => {}
            }
        }

        self.executor.execute_locked(&guard, input, options).await
    }

    /// Resumes a parked run with its recorded input.
    ///
    /// # Errors
    ///
    /// See [`resume_with`](Self::resume_with).
    pub async fn resume(&self, identity: &RunIdentity) -> Result<RunReport, CheckflowError> {
        self.resume_with(identity, &RunOptions::default()).await
    }

    /// Resumes a parked run with explicit options.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown identity and `NoPendingRun` when
    /// the run is complete or has no recorded input. Neither mutates the
    /// context.
    pub async fn resume_with(
        &self,
        identity: &RunIdentity,
        options: &RunOptions,
    ) -> Result<RunReport, CheckflowError> {
        let guard = self.executor.acquire(identity).await;
        let pipeline = self.executor.pipeline();
        let ctx = self.executor.store().read(identity).await?;

        let finished = ctx.checkpoint.is_complete()
            && pipeline
                .final_output_key()
                .is_some_and(|key| ctx.contains_key(key));
        let input = match ctx.input(pipeline.input_key()) {
            Some(input) if !finished => input.to_string(),
            _ => {
                return Err(NoPendingRunError {
                    identity: identity.clone(),
                    checkpoint: ctx.checkpoint.clone(),
                }
                .into())
            }
        };

        info!(run = %identity, checkpoint = %ctx.checkpoint, "Resuming run");
        self.executor.execute_locked(&guard, &input, options).await
    }

    /// Clears the run and returns it to `start`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn reset(&self, identity: &RunIdentity) -> Result<RunStatus, CheckflowError> {
        let guard = self.executor.acquire(identity).await;
        self.reset_locked(&guard).await
    }

    async fn reset_locked(&self, guard: &RunGuard) -> Result<RunStatus, CheckflowError> {
        let ctx = self.executor.store().reset(guard.identity()).await?;
        info!(run = %guard.identity(), "Run reset");
        Ok(RunStatus::new(self.executor.pipeline(), &ctx))
    }

    /// Reports where the run stands.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown identity.
    pub async fn status(&self, identity: &RunIdentity) -> Result<RunStatus, CheckflowError> {
        let ctx = self.executor.store().read(identity).await?;
        Ok(RunStatus::new(self.executor.pipeline(), &ctx))
    }

    /// Returns the furthest completed stage's name and output.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown identity.
    pub async fn latest_output(
        &self,
        identity: &RunIdentity,
    ) -> Result<Option<(String, Value)>, CheckflowError> {
        let ctx = self.executor.store().read(identity).await?;
        Ok(self
            .executor
            .pipeline()
            .latest_output(&ctx.values)
            .map(|(stage, value)| (stage.to_string(), value.clone())))
    }

    /// Parses and runs a text command.
    ///
    /// Structured refusals come back as [`ControllerResponse::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns only fatal errors (store failures and the like).
    pub async fn handle(
        &self,
        identity: &RunIdentity,
        text: &str,
    ) -> Result<ControllerResponse, CheckflowError> {
        let command = Command::parse(text);
        info!(run = %identity, command = command.name(), "Handling command");

        let result = match command {
            Command::Submit(input) => self.submit(identity, &input).await.map(ControllerResponse::Run),
            Command::Resume => self.resume(identity).await.map(ControllerResponse::Run),
            Command::Reset => self.reset(identity).await.map(ControllerResponse::Reset),
            Command::Status => self.status(identity).await.map(ControllerResponse::Status),
            Command::ShowOutput => self.latest_output(identity).await.map(|found| match found {
                Some((stage, value)) => ControllerResponse::Output { stage, value },
                None => ControllerResponse::NoOutput,
            }),
        };

        match result {
            Ok(response) => Ok(response),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => Ok(ControllerResponse::rejected(&err)),
        }
    }
}
