//! Event sink system for observability.
//!
//! The executor reports every lifecycle transition to an [`EventSink`]. The
//! event names below are stable.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// An invocation began.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every stage has output; the run is complete.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A stage failed and the invocation stopped.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// The invocation was cancelled.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// A stage's output was already present.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage attempt began.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage produced output.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage attempt failed and will be retried.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A stage failed for good in this invocation.
pub const STAGE_FAILED: &str = "stage.failed";
/// The persisted checkpoint moved forward.
pub const CHECKPOINT_ADVANCED: &str = "checkpoint.advanced";
/// The persisted checkpoint was not recognised.
pub const CHECKPOINT_UNKNOWN: &str = "checkpoint.unknown";
