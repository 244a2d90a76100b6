//! The persisted position marker of a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel name for a run that has not executed any stage.
pub const START: &str = "start";

/// Sentinel name for a run whose final stage has produced output.
pub const COMPLETE: &str = "complete";

/// Where a run currently stands.
///
/// `Stage` names the next stage to execute. Persisted as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Checkpoint {
    /// Nothing has run yet.
    #[default]
    Start,
    /// The named stage is next.
    Stage(String),
    /// Every stage has produced output.
    Complete,
}

impl Checkpoint {
    /// Creates a checkpoint naming a stage.
    #[must_use]
    pub fn stage(name: impl Into<String>) -> Self {
        Self::Stage(name.into())
    }

    /// Parses a persisted checkpoint name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            START => Self::Start,
            COMPLETE => Self::Complete,
            other => Self::Stage(other.to_string()),
        }
    }

    /// Returns the persisted name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => START,
            Self::Stage(name) => name,
            Self::Complete => COMPLETE,
        }
    }

    /// Returns true when the run is between its first and last stage.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Stage(_))
    }

    /// Returns true for the terminal sentinel.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl From<String> for Checkpoint {
    fn from(name: String) -> Self {
        match name.as_str() {
            START => Self::Start,
            COMPLETE => Self::Complete,
            _ => Self::Stage(name),
        }
    }
}

impl From<Checkpoint> for String {
    fn from(checkpoint: Checkpoint) -> Self {
        match checkpoint {
            Checkpoint::Stage(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
