//! Test assertions for run reports and contexts.

use crate::context::{Checkpoint, RunContext};
use crate::pipeline::{RunOutcome, RunReport};
use crate::errors::StageFailure;
use serde_json::Value;

/// Asserts that the run completed and returns its output.
///
/// # Panics
///
/// Panics if the report is not `Completed`.
pub fn assert_completed(report: &RunReport) -> &Value {
    match &report.outcome {
        RunOutcome::Completed { output } => output,
        other => panic!("Expected a completed run, got {other:?}"),
    }
}

/// Asserts that the run failed at `stage` and returns the failure.
///
/// # Panics
///
/// Panics if the report is not a failure of `stage`.
pub fn assert_failed_at<'a>(report: &'a RunReport, stage: &str) -> &'a StageFailure {
    match &report.outcome {
        RunOutcome::Failed(failure) => {
            assert_eq!(
                failure.stage, stage,
                "Expected failure at '{stage}', got failure at '{}'",
                failure.stage
            );
            failure
        }
        other => panic!("Expected a failure at '{stage}', got {other:?}"),
    }
}

/// Asserts the context's checkpoint.
///
/// # Panics
///
/// Panics on mismatch.
pub fn assert_checkpoint(ctx: &RunContext, expected: &Checkpoint) {
    assert_eq!(
        &ctx.checkpoint, expected,
        "Expected checkpoint '{expected}', got '{}'",
        ctx.checkpoint
    );
}

/// Asserts that exactly `keys` are present in the context, ignoring `ambient`.
///
/// # Panics
///
/// Panics if the key sets differ.
pub fn assert_context_keys(ctx: &RunContext, keys: &[&str], ambient: &[&str]) {
    let mut actual: Vec<&str> = ctx
        .values
        .keys()
        .map(String::as_str)
        .filter(|k| !ambient.contains(k))
        .collect();
    let mut expected = keys.to_vec();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected, "Context keys differ");
}
