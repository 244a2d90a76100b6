//! Test fixtures for pipeline testing.

use std::sync::Arc;

use super::ScriptedStage;
use crate::context::RunIdentity;
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineExecutor};
use crate::store::{ContextStore, InMemoryContextStore};

/// The three-stage code generation pipeline with scripted stages.
///
/// `write` produces `generated_code`, `review` produces `review_comments`
/// from it, and `refactor` produces `refactored_code` from both.
#[derive(Debug, Clone)]
pub struct CodePipeline {
    /// The built pipeline.
    pub pipeline: Pipeline,
    /// The `write` stage.
    pub write: Arc<ScriptedStage>,
    /// The `review` stage.
    pub review: Arc<ScriptedStage>,
    /// The `refactor` stage.
    pub refactor: Arc<ScriptedStage>,
}

impl CodePipeline {
    /// Builds the fixture.
    ///
    /// # Panics
    ///
    /// Never in practice; the definition is fixed and valid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let write = Arc::new(ScriptedStage::new("fn parse() {}"));
        let review = Arc::new(ScriptedStage::new("add error handling"));
        let refactor = Arc::new(ScriptedStage::new("fn parse() -> Result<(), Error> {}"));

        let pipeline = PipelineBuilder::new("code")
            .stage("write", "generated_code", write.clone(), &["input"])
            .and_then(|b| b.stage("review", "review_comments", review.clone(), &["generated_code"]))
            .and_then(|b| {
                b.stage(
                    "refactor",
                    "refactored_code",
                    refactor.clone(),
                    &["generated_code", "review_comments"],
                )
            })
            .and_then(PipelineBuilder::build)
            .expect("code pipeline definition is valid");

        Self {
            pipeline,
            write,
            review,
            refactor,
        }
    }

    /// Creates an executor over `store`.
    #[must_use]
    pub fn executor(&self, store: Arc<dyn ContextStore>) -> PipelineExecutor {
        PipelineExecutor::new(self.pipeline.clone(), store)
    }

    /// Creates an executor over a fresh in-memory store.
    #[must_use]
    pub fn in_memory_executor(&self) -> PipelineExecutor {
        self.executor(Arc::new(InMemoryContextStore::new()))
    }

    /// Total executions across all three stages.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.write.call_count() + self.review.call_count() + self.refactor.call_count()
    }
}

impl Default for CodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for [`CodePipeline::new`].
#[must_use]
pub fn code_pipeline() -> CodePipeline {
    CodePipeline::new()
}

/// A run identity for tests.
#[must_use]
pub fn test_identity(session: &str) -> RunIdentity {
    RunIdentity::new("test-app", "test-user", session)
}
