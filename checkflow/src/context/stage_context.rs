//! The read-only view a stage executes against.

use super::RunIdentity;
use crate::stages::StageError;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Snapshot of a run's context handed to one stage attempt.
///
/// Reads are restricted to the keys the stage declared, plus the triggering
/// input.
#[derive(Debug, Clone)]
pub struct StageContext {
    identity: RunIdentity,
    stage_name: String,
    input: String,
    input_key: String,
    snapshot: Arc<Map<String, Value>>,
    declared: Arc<HashSet<String>>,
    attempt: u32,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        identity: RunIdentity,
        stage_name: impl Into<String>,
        input: impl Into<String>,
        snapshot: Map<String, Value>,
    ) -> Self {
        Self {
            identity,
            stage_name: stage_name.into(),
            input: input.into(),
            input_key: crate::config::DEFAULT_INPUT_KEY.to_string(),
            snapshot: Arc::new(snapshot),
            declared: Arc::new(HashSet::new()),
            attempt: 1,
        }
    }

    /// Sets the key the triggering input is recorded under.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    /// Sets the declared input keys.
    #[must_use]
    pub fn with_declared_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = Arc::new(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the attempt number (1-based).
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The run being executed.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// The stage being executed.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// The triggering input text.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// The attempt number within this invocation, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The full snapshot, regardless of declarations.
    #[must_use]
    pub fn snapshot(&self) -> &Map<String, Value> {
        &self.snapshot
    }

    /// Returns true if the stage may read `key`.
    #[must_use]
    pub fn is_declared(&self, key: &str) -> bool {
        key == self.input_key || self.declared.contains(key)
    }

    /// Gets a declared value, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an `UndeclaredInput` error if the stage did not declare `key`.
    pub fn get(&self, key: &str) -> Result<Option<&Value>, StageError> {
        if !self.is_declared(key) {
            return Err(StageError::undeclared_input(&self.stage_name, key));
        }
        Ok(self.snapshot.get(key))
    }

    /// Gets a declared value that must be present.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredInput` for undeclared keys and `MissingInput` for
    /// declared keys that have no value yet.
    pub fn require(&self, key: &str) -> Result<&Value, StageError> {
        self.get(key)?
            .ok_or_else(|| StageError::missing_input(&self.stage_name, key))
    }

    /// Gets a declared value that must be a string.
    ///
    /// # Errors
    ///
    /// Same as [`require`](Self::require), and `Failed` if the value is not a
    /// string.
    pub fn require_str(&self, key: &str) -> Result<&str, StageError> {
        self.require(key)?.as_str().ok_or_else(|| {
            StageError::failed(format!(
                "Input '{key}' of stage '{}' is not a string",
                self.stage_name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageErrorKind;
    use serde_json::json;

    fn stage_context() -> StageContext {
        let mut snapshot = Map::new();
        snapshot.insert("input".to_string(), json!("build a parser"));
        snapshot.insert("generated_code".to_string(), json!("fn parse() {}"));
        snapshot.insert("secret".to_string(), json!(42));

        StageContext::new(
            RunIdentity::new("app", "user", "s"),
            "review",
            "build a parser",
            snapshot,
        )
        .with_declared_inputs(["generated_code", "review_comments"])
    }

    #[test]
    fn test_require_declared_present() {
        let ctx = stage_context();
        assert_eq!(ctx.require_str("generated_code").unwrap(), "fn parse() {}");
    }

    #[test]
    fn test_input_key_always_readable() {
        let ctx = stage_context();
        assert_eq!(ctx.require_str("input").unwrap(), "build a parser");
        assert_eq!(ctx.input(), "build a parser");
    }

    #[test]
    fn test_undeclared_key_rejected() {
        let ctx = stage_context();
        let err = ctx.require("secret").unwrap_err();
        assert_eq!(err.kind, StageErrorKind::UndeclaredInput);
    }

    #[test]
    fn test_declared_but_missing() {
        let ctx = stage_context();
        assert!(ctx.get("review_comments").unwrap().is_none());

        let err = ctx.require("review_comments").unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MissingInput);
        assert!(err.message.contains("review_comments"));
    }

    #[test]
    fn test_non_string_value() {
        let ctx = stage_context().with_declared_inputs(["secret"]);
        let err = ctx.require_str("secret").unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Failed);
    }
}
