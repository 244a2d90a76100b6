//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::StageContext;
use crate::stages::{Stage, StageError};

/// A stage that plays back queued results, then a default output.
///
/// Records every call so tests can assert at-most-once execution.
#[derive(Debug)]
pub struct ScriptedStage {
    output: Mutex<Value>,
    queued: Mutex<VecDeque<Result<Value, StageError>>>,
    call_count: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    snapshots: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedStage {
    /// Creates a stage that succeeds with `output` unless a result is queued.
    #[must_use]
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: Mutex::new(output.into()),
            queued: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    /// Sets the default output.
    pub fn set_output(&self, output: impl Into<Value>) {
        *self.output.lock() = output.into();
    }

    /// Queues a result for the next call.
    pub fn push_result(&self, result: Result<Value, StageError>) {
        self.queued.lock().push_back(result);
    }

    /// Makes the next call fail with a non-retryable error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.push_result(Err(StageError::failed(message)));
    }

    /// Makes the next call fail with a retryable error.
    pub fn fail_next_retryable(&self, message: impl Into<String>) {
        self.push_result(Err(StageError::retryable(message)));
    }

    /// Returns the number of times the stage was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the triggering input of each call.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    /// Returns the context snapshot of each call.
    #[must_use]
    pub fn recorded_snapshots(&self) -> Vec<Map<String, Value>> {
        self.snapshots.lock().clone()
    }

    /// Resets call tracking and drops queued results.
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        self.queued.lock().clear();
        self.inputs.lock().clear();
        self.snapshots.lock().clear();
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(ctx.input().to_string());
        self.snapshots.lock().push(ctx.snapshot().clone());

        let queued = self.queued.lock().pop_front();
        queued.unwrap_or_else(|| Ok(self.output.lock().clone()))
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    error: StageError,
    call_count: AtomicUsize,
}

impl FailingStage {
    /// Creates a stage failing with a non-retryable error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_error(StageError::failed(message))
    }

    /// Creates a stage failing with a retryable error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::with_error(StageError::retryable(message))
    }

    /// Creates a stage failing with the given error.
    #[must_use]
    pub fn with_error(error: StageError) -> Self {
        Self {
            error,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, StageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A stage that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowStage {
    delay: Duration,
    output: Value,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(delay: Duration, output: impl Into<Value>) -> Self {
        Self {
            delay,
            output: output.into(),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Returns how many executions began.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns how many executions ran to completion.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for SlowStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, StageError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;
    use serde_json::json;

    fn ctx() -> StageContext {
        StageContext::new(RunIdentity::new("a", "u", "s"), "test", "hello", Map::new())
    }

    #[tokio::test]
    async fn test_scripted_stage_plays_queue_then_default() {
        let stage = ScriptedStage::new("default");
        stage.fail_next("first");
        stage.push_result(Ok(json!("second")));

        assert!(stage.execute(&ctx()).await.is_err());
        assert_eq!(stage.execute(&ctx()).await.unwrap(), json!("second"));
        assert_eq!(stage.execute(&ctx()).await.unwrap(), json!("default"));
        assert_eq!(stage.call_count(), 3);
        assert_eq!(stage.recorded_inputs(), vec!["hello"; 3]);

        stage.reset();
        assert_eq!(stage.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let stage = FailingStage::retryable("flaky");
        let err = stage.execute(&ctx()).await.unwrap_err();
        assert!(err.retryable);
        assert_eq!(stage.call_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_stage() {
        let stage = SlowStage::new(Duration::from_millis(5), "slow");
        assert_eq!(stage.execute(&ctx()).await.unwrap(), json!("slow"));
        assert_eq!(stage.started(), 1);
        assert_eq!(stage.finished(), 1);
    }
}
