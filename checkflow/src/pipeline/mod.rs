//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage descriptors and the validated [`Pipeline`] definition
//! - A builder that rejects ambiguous definitions
//! - The checkpointed [`PipelineExecutor`]
//! - Stage retry policy

mod builder;
mod executor;
mod report;
mod retry;
mod spec;


pub use builder::PipelineBuilder;
pub use executor::PipelineExecutor;
pub use report::{RunOptions, RunOutcome, RunReport, RunWarning};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};
pub use spec::{Pipeline, StageSpec};
