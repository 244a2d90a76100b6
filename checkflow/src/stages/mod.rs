//! Stage trait and implementations.
//!
//! Stages are the units of work a checkflow pipeline runs in order. A stage
//! must be a pure function of the snapshot it is given, so that re-running it
//! after a crash or skipping it because its output exists is safe.

mod error;

pub use error::{StageError, StageErrorKind};

use crate::context::StageContext;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Snapshot of the run context plus the triggering input
    ///
    /// # Returns
    ///
    /// The value to store under the stage's output key.
    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<Value> + Send + Sync,
{
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<Value> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<Value> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError> {
        (self.func)(ctx).map_err(StageError::from)
    }
}

/// An async function-based stage.
///
/// The closure receives an owned [`StageContext`] so the returned future can
/// be `'static`.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send,
{
    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError> {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that always returns the same value.
#[derive(Debug, Clone)]
pub struct ConstStage {
    value: Value,
}

impl ConstStage {
    /// Creates a new constant stage.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Stage for ConstStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, StageError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;
    use serde_json::{json, Map};

    fn test_stage_context() -> StageContext {
        let mut snapshot = Map::new();
        snapshot.insert("input".to_string(), json!("hello"));
        StageContext::new(RunIdentity::new("app", "u", "s"), "test", "hello", snapshot)
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new(|ctx| Ok(json!(ctx.input().to_uppercase())));

        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output, json!("HELLO"));
    }

    #[tokio::test]
    async fn test_fn_stage_error_converts() {
        let stage = FnStage::new(|_ctx| anyhow::bail!("model unavailable"));

        let err = stage.execute(&test_stage_context()).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Failed);
        assert_eq!(err.message, "model unavailable");
    }

    #[tokio::test]
    async fn test_async_fn_stage() {
        let stage = AsyncFnStage::new(|ctx: StageContext| async move {
            tokio::task::yield_now().await;
            Ok(json!(format!("{}!", ctx.input())))
        });

        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output, json!("hello!"));
    }

    #[tokio::test]
    async fn test_const_stage() {
        let stage = ConstStage::new("done");
        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output, json!("done"));
    }
}
