//! The checkpointed pipeline executor.
//!
//! One invocation loads the run's context, maps its checkpoint to a start
//! index, then walks the remaining stages in order. A stage whose output key
//! is already present is skipped. Every success is persisted with
//! [`ContextStore::apply`] before the next stage starts, so an aborted
//! invocation leaves the run positioned for resume.

use super::report::{RunOptions, RunOutcome, RunReport, RunWarning};
use super::retry::{RetryDecision, RetryState};
use super::{Pipeline, StageSpec};
use crate::cancellation::CancellationToken;
use crate::config::{ConfigError, ExecutorConfig};
use crate::context::{Checkpoint, RunContext, RunIdentity, StageContext};
use crate::errors::{CheckflowError, StageFailure, UnknownCheckpointError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::stages::StageError;
use crate::store::{ContextStore, RunGuard};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Drives a [`Pipeline`] against a [`ContextStore`].
///
/// Invocations for the same identity are serialized through the store's
/// lease, so executors sharing a store never overlap on one run. Different
/// identities run in parallel.
#[derive(Debug)]
pub struct PipelineExecutor {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ContextStore>,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

/// What happened to one stage in one invocation.
enum StageRun {
    Succeeded { output: Value },
    Failed { error: StageError, attempts: u32 },
    Cancelled { reason: String },
}

/// Per-invocation bookkeeping for the report.
#[derive(Default)]
struct Progress {
    executed: Vec<String>,
    skipped: Vec<String>,
    warnings: Vec<RunWarning>,
}

impl PipelineExecutor {
    /// Creates an executor with default settings and no event sink.
    #[must_use]
    pub fn new(pipeline: Pipeline, store: Arc<dyn ContextStore>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
            sink: Arc::new(NoOpEventSink),
            config: ExecutorConfig::default(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the executor defaults.
    ///
    /// The input key is fixed by the pipeline; build it with
    /// [`PipelineBuilder::from_config`](super::PipelineBuilder::from_config)
    /// to take it from the config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `config.input_key` differs from
    /// the pipeline's input key.
    pub fn with_config(mut self, config: ExecutorConfig) -> Result<Self, ConfigError> {
        if config.input_key != self.pipeline.input_key() {
            return Err(ConfigError::Invalid {
                key: "executor.input_key".to_string(),
                value: config.input_key,
                reason: format!(
                    "pipeline '{}' records its input under '{}'",
                    self.pipeline.name(),
                    self.pipeline.input_key()
                ),
            });
        }
        self.config = config;
        Ok(self)
    }

    /// The pipeline definition.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The context store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// Returns true if some invocation holds the lease for `identity`.
    #[must_use]
    pub fn is_running(&self, identity: &RunIdentity) -> bool {
        self.store.is_leased(identity)
    }

    /// Waits for exclusive access to `identity` through the store's lease.
    pub async fn acquire(&self, identity: &RunIdentity) -> RunGuard {
        self.store.lease(identity).await
    }

    /// Runs the pipeline for `identity` with default options.
    ///
    /// # Errors
    ///
    /// Returns an error only when the context store fails. Stage failures
    /// and cancellation are reported in the [`RunReport`].
    pub async fn execute(
        &self,
        identity: &RunIdentity,
        input: &str,
    ) -> Result<RunReport, CheckflowError> {
        self.execute_with(identity, input, &RunOptions::default()).await
    }

    /// Runs the pipeline for `identity` with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error only when the context store fails.
    pub async fn execute_with(
        &self,
        identity: &RunIdentity,
        input: &str,
        options: &RunOptions,
    ) -> Result<RunReport, CheckflowError> {
        let guard = self.acquire(identity).await;
        self.execute_locked(&guard, input, options).await
    }

    /// Runs the pipeline while the caller already holds the identity's lock.
    ///
    /// # Errors
    ///
    /// Returns an error only when the context store fails.
    pub async fn execute_locked(
        &self,
        guard: &RunGuard,
        input: &str,
        options: &RunOptions,
    ) -> Result<RunReport, CheckflowError> {
        let identity = guard.identity();
        let invocation_id = Uuid::now_v7();
        let span = info_span!(
            "pipeline_run",
            pipeline = %self.pipeline.name(),
            run = %identity,
            invocation_id = %invocation_id,
        );
        self.run(identity, input, options, invocation_id)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        identity: &RunIdentity,
        input: &str,
        options: &RunOptions,
        invocation_id: Uuid,
    ) -> Result<RunReport, CheckflowError> {
        let started = Instant::now();
        let mut progress = Progress::default();
        let input_key = self.pipeline.input_key();

        let mut initial = Map::new();
        initial.insert(input_key.to_string(), json!(input));
        let mut ctx = self.store.get_or_create(identity, initial).await?;
        if !ctx.contains_key(input_key) {
            ctx = self
                .store
                .apply(identity, input_key, json!(input), ctx.checkpoint.clone())
                .await?;
        }

        let start = match self.start_index(&ctx) {
            Ok(index) => index,
            Err(rejected) => {
                error!(
                    checkpoint = %rejected.checkpoint,
                    reason = %rejected.reason,
                    "Persisted checkpoint rejected, restarting from the first stage"
                );
                self.emit(
                    events::CHECKPOINT_UNKNOWN,
                    identity,
                    json!({"checkpoint": rejected.checkpoint, "reason": rejected.reason}),
                );
                progress.warnings.push(RunWarning::UnknownCheckpoint(rejected));
                let recorded = ctx.get(input_key).cloned().unwrap_or_else(|| json!(input));
                ctx = self
                    .store
                    .apply(identity, input_key, recorded, Checkpoint::Start)
                    .await?;
                0
            }
        };

        info!(
            checkpoint = %ctx.checkpoint,
            start_index = start,
            "Pipeline invocation started"
        );
        self.emit(
            events::PIPELINE_STARTED,
            identity,
            json!({"checkpoint": ctx.checkpoint.as_str(), "start_index": start}),
        );

        // Stages behind the checkpoint are not revisited; their stored
        // output stands in for them.
        progress.skipped.extend(
            self.pipeline.stages()[..start]
                .iter()
                .filter(|spec| ctx.contains_key(&spec.output_key))
                .map(|spec| spec.name.clone()),
        );

        let token = options.cancellation.as_deref();
        let mut persisted = start;

        for (index, spec) in self.pipeline.stages().iter().enumerate().skip(start) {
            let next = self.pipeline.checkpoint_after(index);

            if let Some(existing) = ctx.get(&spec.output_key).cloned() {
                debug!(stage = %spec.name, "Output present, skipping stage");
                self.emit(
                    events::STAGE_SKIPPED,
                    identity,
                    json!({"stage": spec.name, "output_key": spec.output_key}),
                );
                progress.skipped.push(spec.name.clone());
                if index + 1 > persisted {
                    ctx = self
                        .advance(identity, spec, existing, next)
                        .await?;
                    persisted = index + 1;
                }
                continue;
            }

            if let Some(token) = token.filter(|t| t.is_cancelled()) {
                return Ok(self.cancelled(identity, invocation_id, &ctx, progress, token_reason(token), started));
            }

            match self.run_stage(identity, spec, input, &ctx, options).await {
                StageRun::Succeeded { output } => {
                    ctx = self.advance(identity, spec, output, next).await?;
                    persisted = index + 1;
                    progress.executed.push(spec.name.clone());
                }
                StageRun::Failed { error, attempts } => {
                    let failure =
                        StageFailure::new(&spec.name, ctx.checkpoint.clone(), error, attempts);
                    warn!(
                        stage = %failure.stage,
                        checkpoint = %failure.checkpoint,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Stage failed, run parked at checkpoint"
                    );
                    self.emit(
                        events::STAGE_FAILED,
                        identity,
                        json!({"stage": failure.stage, "error": failure.error.message, "attempts": attempts}),
                    );
                    self.emit(
                        events::PIPELINE_FAILED,
                        identity,
                        json!({"checkpoint": failure.checkpoint.as_str(), "stage": failure.stage}),
                    );
                    let checkpoint = ctx.checkpoint.clone();
                    return Ok(self.report(
                        identity,
                        invocation_id,
                        RunOutcome::Failed(failure),
                        checkpoint,
                        progress,
                        started,
                    ));
                }
                StageRun::Cancelled { reason } => {
                    return Ok(self.cancelled(identity, invocation_id, &ctx, progress, reason, started));
                }
            }
        }

        let output = self
            .pipeline
            .final_output_key()
            .and_then(|key| ctx.get(key))
            .cloned()
            .ok_or_else(|| {
                CheckflowError::Internal(format!(
                    "run {identity} reached 'complete' without a final output"
                ))
            })?;

        info!(
            executed = progress.executed.len(),
            skipped = progress.skipped.len(),
            "Pipeline complete"
        );
        self.emit(
            events::PIPELINE_COMPLETED,
            identity,
            json!({"executed": progress.executed, "skipped": progress.skipped}),
        );
        let checkpoint = ctx.checkpoint.clone();
        Ok(self.report(
            identity,
            invocation_id,
            RunOutcome::Completed { output },
            checkpoint,
            progress,
            started,
        ))
    }

    /// Maps the persisted checkpoint onto a start index.
    fn start_index(&self, ctx: &RunContext) -> Result<usize, UnknownCheckpointError> {
        let index = self.pipeline.resolve(&ctx.checkpoint)?;
        let final_missing = self
            .pipeline
            .final_output_key()
            .is_some_and(|key| !ctx.contains_key(key));
        if ctx.checkpoint.is_complete() && final_missing {
            return Err(UnknownCheckpointError::new(
                self.pipeline.name(),
                ctx.checkpoint.as_str(),
                "run is marked complete but the final output is missing",
            ));
        }
        Ok(index)
    }

    async fn advance(
        &self,
        identity: &RunIdentity,
        spec: &StageSpec,
        value: Value,
        next: Checkpoint,
    ) -> Result<RunContext, CheckflowError> {
        let ctx = self
            .store
            .apply(identity, &spec.output_key, value, next)
            .await?;
        debug!(stage = %spec.name, checkpoint = %ctx.checkpoint, "Checkpoint advanced");
        self.emit(
            events::CHECKPOINT_ADVANCED,
            identity,
            json!({"stage": spec.name, "checkpoint": ctx.checkpoint.as_str(), "revision": ctx.revision}),
        );
        Ok(ctx)
    }

    async fn run_stage(
        &self,
        identity: &RunIdentity,
        spec: &StageSpec,
        input: &str,
        ctx: &RunContext,
        options: &RunOptions,
    ) -> StageRun {
        let retry = spec.retry.as_ref().unwrap_or(&self.config.retry);
        let timeout = spec.timeout.or_else(|| self.config.stage_timeout());
        let token = options.cancellation.as_deref();

        if options.dump_context {
            let snapshot = Value::Object(ctx.values.clone());
            debug!(stage = %spec.name, context = %snapshot, "Stage context snapshot");
        }

        let base = StageContext::new(identity.clone(), &spec.name, input, ctx.values.clone())
            .with_input_key(self.pipeline.input_key())
            .with_declared_inputs(spec.inputs.iter().cloned());
        let mut state = RetryState::new();

        loop {
            let attempt = state.record_attempt();
            let stage_ctx = base.clone().with_attempt(attempt);
            info!(stage = %spec.name, attempt, "Stage started");
            self.emit(
                events::STAGE_STARTED,
                identity,
                json!({"stage": spec.name, "attempt": attempt}),
            );

            let Some(result) = race_cancel(token, attempt_stage(spec, &stage_ctx, timeout)).await
            else {
                return StageRun::Cancelled {
                    reason: token.map_or_else(String::new, token_reason),
                };
            };

            let error = match result {
                Ok(output) => {
                    info!(stage = %spec.name, attempt, "Stage completed");
                    self.emit(
                        events::STAGE_COMPLETED,
                        identity,
                        json!({"stage": spec.name, "attempt": attempt}),
                    );
                    return StageRun::Succeeded { output };
                }
                Err(error) => error,
            };

            match state.decide(retry, error.retryable) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        stage = %spec.name,
                        attempt,
                        delay_ms = duration_ms(delay),
                        error = %error,
                        "Stage attempt failed, retrying"
                    );
                    self.emit(
                        events::STAGE_RETRYING,
                        identity,
                        json!({"stage": spec.name, "attempt": attempt, "delay_ms": duration_ms(delay), "error": error.message}),
                    );
                    if race_cancel(token, tokio::time::sleep(delay)).await.is_none() {
                        return StageRun::Cancelled {
                            reason: token.map_or_else(String::new, token_reason),
                        };
                    }
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return StageRun::Failed {
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    fn cancelled(
        &self,
        identity: &RunIdentity,
        invocation_id: Uuid,
        ctx: &RunContext,
        progress: Progress,
        reason: String,
        started: Instant,
    ) -> RunReport {
        warn!(checkpoint = %ctx.checkpoint, reason = %reason, "Pipeline cancelled");
        self.emit(
            events::PIPELINE_CANCELLED,
            identity,
            json!({"checkpoint": ctx.checkpoint.as_str(), "reason": reason}),
        );
        self.report(
            identity,
            invocation_id,
            RunOutcome::Cancelled { reason },
            ctx.checkpoint.clone(),
            progress,
            started,
        )
    }

    fn report(
        &self,
        identity: &RunIdentity,
        invocation_id: Uuid,
        outcome: RunOutcome,
        checkpoint: Checkpoint,
        progress: Progress,
        started: Instant,
    ) -> RunReport {
        RunReport {
            identity: identity.clone(),
            invocation_id,
            outcome,
            checkpoint,
            executed: progress.executed,
            skipped: progress.skipped,
            warnings: progress.warnings,
            duration_ms: duration_ms(started.elapsed()),
        }
    }

    fn emit(&self, event_type: &str, identity: &RunIdentity, mut data: Value) {
        if let Value::Object(ref mut map) = data {
            map.insert("pipeline".to_string(), json!(self.pipeline.name()));
            map.insert("run".to_string(), json!(identity.to_string()));
        }
        self.sink.try_emit(event_type, Some(data));
    }
}

async fn attempt_stage(
    spec: &StageSpec,
    ctx: &StageContext,
    timeout: Option<Duration>,
) -> Result<Value, StageError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, spec.runner.execute(ctx))
            .await
            .unwrap_or_else(|_| Err(StageError::timeout(&spec.name, limit))),
        None => spec.runner.execute(ctx).await,
    }
}

/// Polls `fut` until it finishes or `token` fires. `None` means cancelled.
async fn race_cancel<F: Future>(token: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match token {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => None,
            output = fut => Some(output),
        },
        None => Some(fut.await),
    }
}

fn token_reason(token: &CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "cancelled".to_string())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
