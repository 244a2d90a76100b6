//! The error a stage function returns.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Category of a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The stage reported a failure.
    Failed,
    /// The stage exceeded its time limit.
    Timeout,
    /// A declared input had no value.
    MissingInput,
    /// The stage read a key it did not declare.
    UndeclaredInput,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::MissingInput => write!(f, "missing_input"),
            Self::UndeclaredInput => write!(f, "undeclared_input"),
        }
    }
}

/// Error returned by [`Stage::execute`](super::Stage::execute).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct StageError {
    /// The error category.
    pub kind: StageErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl StageError {
    /// Creates a non-retryable failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Failed,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a failure that is worth retrying.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Failed,
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a timeout error. Timeouts are retryable.
    #[must_use]
    pub fn timeout(stage: &str, limit: Duration) -> Self {
        Self {
            kind: StageErrorKind::Timeout,
            message: format!("Stage '{stage}' timed out after {}ms", limit.as_millis()),
            retryable: true,
        }
    }

    /// Creates a missing input error.
    #[must_use]
    pub fn missing_input(stage: &str, key: &str) -> Self {
        Self {
            kind: StageErrorKind::MissingInput,
            message: format!("Stage '{stage}' requires '{key}' but it is not in the context"),
            retryable: false,
        }
    }

    /// Creates an undeclared input error.
    #[must_use]
    pub fn undeclared_input(stage: &str, key: &str) -> Self {
        Self {
            kind: StageErrorKind::UndeclaredInput,
            message: format!("Stage '{stage}' read undeclared input '{key}'"),
            retryable: false,
        }
    }

    /// Marks the error as retryable or not.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns true for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == StageErrorKind::Timeout
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(stage_err) => stage_err,
            Err(other) => Self::failed(format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(!StageError::failed("x").retryable);
        assert!(StageError::retryable("x").retryable);

        let timeout = StageError::timeout("review", Duration::from_millis(250));
        assert!(timeout.is_timeout());
        assert!(timeout.retryable);
        assert_eq!(timeout.to_string(), "Stage 'review' timed out after 250ms");
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("connection reset").context("calling reviewer");
        let stage_err = StageError::from(err);

        assert_eq!(stage_err.kind, StageErrorKind::Failed);
        assert_eq!(stage_err.message, "calling reviewer: connection reset");
    }

    #[test]
    fn test_from_anyhow_downcasts_stage_error() {
        let err = anyhow::Error::new(StageError::retryable("rate limited"));
        let stage_err = StageError::from(err);

        assert!(stage_err.retryable);
        assert_eq!(stage_err.message, "rate limited");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StageErrorKind::MissingInput.to_string(), "missing_input");
    }
}
