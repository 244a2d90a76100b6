//! In-process context store.

use super::{ContextStore, RunLocks};
use crate::context::{Checkpoint, RunContext, RunIdentity};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

/// A context store backed by a concurrent hash map.
///
/// Durable only for the lifetime of the process. Each entry is mutated under
/// its shard lock, so `apply` is atomic per identity.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    runs: DashMap<RunIdentity, RunContext>,
    leases: RunLocks,
}

impl InMemoryContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no runs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    fn run_locks(&self) -> &RunLocks {
        &self.leases
    }

    async fn get_or_create(
        &self,
        identity: &RunIdentity,
        initial: Map<String, Value>,
    ) -> Result<RunContext, StoreError> {
        let entry = self
            .runs
            .entry(identity.clone())
            .or_insert_with(|| RunContext::new(identity.clone(), initial));
        Ok(entry.value().clone())
    }

    async fn read(&self, identity: &RunIdentity) -> Result<RunContext, StoreError> {
        self.runs
            .get(identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(identity))
    }

    async fn apply(
        &self,
        identity: &RunIdentity,
        key: &str,
        value: Value,
        next: Checkpoint,
    ) -> Result<RunContext, StoreError> {
        let mut entry = self
            .runs
            .get_mut(identity)
            .ok_or_else(|| StoreError::not_found(identity))?;
        entry.apply(key, value, next);
        Ok(entry.value().clone())
    }

    async fn reset(&self, identity: &RunIdentity) -> Result<RunContext, StoreError> {
        let mut entry = self
            .runs
            .entry(identity.clone())
            .or_insert_with(|| RunContext::new(identity.clone(), Map::new()));
        entry.reset();
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn identity(session: &str) -> RunIdentity {
        RunIdentity::new("app", "user", session)
    }

    #[tokio::test]
    async fn test_get_or_create_seeds_once() {
        let store = InMemoryContextStore::new();
        let mut initial = Map::new();
        initial.insert("input".to_string(), json!("first"));

        let created = store.get_or_create(&identity("a"), initial).await.unwrap();
        assert_eq!(created.checkpoint, Checkpoint::Start);
        assert_eq!(created.get("input"), Some(&json!("first")));

        let mut other = Map::new();
        other.insert("input".to_string(), json!("second"));
        let existing = store.get_or_create(&identity("a"), other).await.unwrap();
        assert_eq!(existing.get("input"), Some(&json!("first")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_read_unknown_is_not_found() {
        let store = InMemoryContextStore::new();
        let err = store.read(&identity("missing")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists(&identity("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_unknown_is_not_found() {
        let store = InMemoryContextStore::new();
        let err = store
            .apply(&identity("missing"), "k", json!(1), Checkpoint::Complete)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_apply_then_reset() {
        let store = InMemoryContextStore::new();
        let id = identity("a");
        store.get_or_create(&id, Map::new()).await.unwrap();

        let ctx = store
            .apply(&id, "generated_code", json!("code"), Checkpoint::stage("review"))
            .await
            .unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::stage("review"));
        assert_eq!(store.read(&id).await.unwrap(), ctx);

        let ctx = store.reset(&id).await.unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::Start);
        assert!(ctx.values.is_empty());
    }

    #[tokio::test]
    async fn test_reset_unknown_creates_empty() {
        let store = InMemoryContextStore::new();
        let ctx = store.reset(&identity("new")).await.unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::Start);
        assert!(store.exists(&identity("new")).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let store = Arc::new(InMemoryContextStore::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = identity(&format!("s{i}"));
                store.get_or_create(&id, Map::new()).await.unwrap();
                for step in 0..10 {
                    store
                        .apply(&id, &format!("k{step}"), json!(step), Checkpoint::Start)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 16);
        let ctx = store.read(&identity("s3")).await.unwrap();
        assert_eq!(ctx.values.len(), 10);
        assert_eq!(ctx.revision, 10);
    }

    #[tokio::test]
    async fn test_lease_is_shared_through_the_store() {
        let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::new());
        let other = Arc::clone(&store);
        let id = identity("a");

        let lease = store.lease(&id).await;
        assert!(other.is_leased(&id));
        assert!(other.run_locks().try_acquire(&id).is_none());

        drop(lease);
        assert!(!other.is_leased(&id));
        assert!(store.run_locks().is_empty());
    }
}
