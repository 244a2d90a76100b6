//! # Checkflow
//!
//! Checkpointed sequential pipelines with durable resume.
//!
//! A pipeline is an ordered list of stages, each writing one key into a
//! per-run context. After every successful stage the context and the run's
//! checkpoint are persisted together, so a run interrupted by a stage
//! failure, a timeout or a crash resumes at the first stage without output:
//!
//! - **Skip-if-present**: a stage whose output key exists is never re-run
//! - **Durable stores**: in-memory or one fsynced JSON document per run
//! - **Run controller**: submit / resume / reset / status with input conflict detection
//! - **Event-driven observability**: lifecycle events plus `tracing` spans
//! - **Cancellation and timeouts**: per-invocation tokens and per-attempt limits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("code")
//!     .stage("write", "generated_code", writer, &["input"])?
//!     .stage("review", "review_comments", reviewer, &["generated_code"])?
//!     .stage("refactor", "refactored_code", refactorer, &["generated_code", "review_comments"])?
//!     .build()?;
//!
//! let controller = RunController::new(PipelineExecutor::new(pipeline, store));
//! let report = controller.submit(&RunIdentity::new("app", "user", "session"), "a csv parser").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod controller;
pub mod errors;
pub mod events;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{CheckflowConfig, ExecutorConfig, LoggingConfig, StoreConfig};
    pub use crate::context::{Checkpoint, RunContext, RunIdentity, StageContext};
    pub use crate::controller::{Command, ControllerResponse, RunController, RunStatus};
    pub use crate::errors::{
        CheckflowError, ConflictingInputError, NoPendingRunError, PipelineValidationError,
        StageFailure, StoreError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::llm::{CompletionClient, CompletionRequest, PromptStage, PromptTemplate};
    pub use crate::pipeline::{
        Pipeline, PipelineBuilder, PipelineExecutor, RetryConfig, RunOptions, RunOutcome,
        RunReport, StageSpec,
    };
    pub use crate::stages::{AsyncFnStage, FnStage, Stage, StageError};
    pub use crate::store::{ContextStore, FileContextStore, InMemoryContextStore};
}
