//! Testing utilities for checkflow pipelines.
//!
//! This module provides:
//! - Scripted, failing and slow stages
//! - The code-generation pipeline fixture
//! - Assertions over run reports and contexts

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_checkpoint, assert_completed, assert_context_keys, assert_failed_at};
pub use fixtures::{code_pipeline, test_identity, CodePipeline};
pub use mocks::{FailingStage, ScriptedStage, SlowStage};
