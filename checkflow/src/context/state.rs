//! Durable per-run state.

use super::{Checkpoint, RunIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The state bag owned by one run.
///
/// Values keep insertion order. Mutated only through the context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// The run this context belongs to.
    pub identity: RunIdentity,
    /// The current position marker.
    pub checkpoint: Checkpoint,
    /// Stage outputs and ambient fields.
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Incremented by every applied mutation.
    #[serde(default)]
    pub revision: u64,
    /// When the context was first created.
    pub created_at: DateTime<Utc>,
    /// When the context was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl RunContext {
    /// Creates a fresh context positioned at `start`.
    #[must_use]
    pub fn new(identity: RunIdentity, initial: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            identity,
            checkpoint: Checkpoint::Start,
            values: initial,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Gets a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the recorded triggering input stored under `input_key`.
    #[must_use]
    pub fn input(&self, input_key: &str) -> Option<&str> {
        self.values.get(input_key).and_then(Value::as_str)
    }

    /// Merges one value and moves the checkpoint.
    pub fn apply(&mut self, key: impl Into<String>, value: Value, next: Checkpoint) {
        self.values.insert(key.into(), value);
        self.checkpoint = next;
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    /// Clears all values and returns to `start`.
    pub fn reset(&mut self) {
        self.values.clear();
        self.checkpoint = Checkpoint::Start;
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RunContext {
        RunContext::new(RunIdentity::new("app", "user", "s"), Map::new())
    }

    #[test]
    fn test_new_is_at_start() {
        let ctx = context();
        assert_eq!(ctx.checkpoint, Checkpoint::Start);
        assert!(ctx.values.is_empty());
        assert_eq!(ctx.revision, 0);
    }

    #[test]
    fn test_apply_merges_and_advances() {
        let mut ctx = context();
        ctx.apply("generated_code", json!("fn main() {}"), Checkpoint::stage("review"));

        assert_eq!(ctx.get("generated_code"), Some(&json!("fn main() {}")));
        assert_eq!(ctx.checkpoint, Checkpoint::stage("review"));
        assert_eq!(ctx.revision, 1);
    }

    #[test]
    fn test_values_keep_insertion_order() {
        let mut ctx = context();
        ctx.apply("zeta", json!(1), Checkpoint::Start);
        ctx.apply("alpha", json!(2), Checkpoint::Start);

        let keys: Vec<_> = ctx.values.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_reset() {
        let mut ctx = context();
        ctx.apply("input", json!("x"), Checkpoint::Complete);
        ctx.reset();

        assert_eq!(ctx.checkpoint, Checkpoint::Start);
        assert!(ctx.values.is_empty());
        assert_eq!(ctx.revision, 2);
    }

    #[test]
    fn test_input() {
        let mut ctx = context();
        assert_eq!(ctx.input("input"), None);
        ctx.apply("input", json!("build a parser"), Checkpoint::Start);
        assert_eq!(ctx.input("input"), Some("build a parser"));
    }
}
