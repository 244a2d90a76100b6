//! Run status reports.

use crate::context::{Checkpoint, RunContext, RunIdentity};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Stage name.
    pub name: String,
    /// The key the stage writes.
    pub output_key: String,
    /// Whether the output is present.
    pub complete: bool,
}

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// The run.
    pub identity: RunIdentity,
    /// The pipeline name.
    pub pipeline: String,
    /// The persisted checkpoint.
    pub checkpoint: Checkpoint,
    /// The recorded triggering input.
    pub input: Option<String>,
    /// Per-stage progress in pipeline order.
    pub stages: Vec<StageProgress>,
    /// True when the run is parked between its first and last stage.
    pub in_flight: bool,
    /// Context revision.
    pub revision: u64,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl RunStatus {
    /// Builds the status of `ctx` under `pipeline`.
    #[must_use]
    pub fn new(pipeline: &Pipeline, ctx: &RunContext) -> Self {
        let stages = pipeline
            .stages()
            .iter()
            .map(|s| StageProgress {
                name: s.name.clone(),
                output_key: s.output_key.clone(),
                complete: ctx.contains_key(&s.output_key),
            })
            .collect();
        Self {
            identity: ctx.identity.clone(),
            pipeline: pipeline.name().to_string(),
            checkpoint: ctx.checkpoint.clone(),
            input: ctx.input(pipeline.input_key()).map(str::to_string),
            stages,
            in_flight: ctx.checkpoint.is_in_flight(),
            revision: ctx.revision,
            updated_at: ctx.updated_at,
        }
    }

    /// Output keys that are present, in stage order.
    #[must_use]
    pub fn completed_output_keys(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.complete)
            .map(|s| s.output_key.as_str())
            .collect()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.identity, self.pipeline)?;
        writeln!(f, "Checkpoint: {}", self.checkpoint)?;
        match &self.input {
            Some(input) => writeln!(f, "Input: {input}")?,
            None => writeln!(f, "Input: (none)")?,
        }
        for stage in &self.stages {
            let mark = if stage.complete { "complete" } else { "pending" };
            writeln!(f, "  {} -> {}: {mark}", stage.name, stage.output_key)?;
        }
        Ok(())
    }
}
