//! Durable context stores.
//!
//! A [`ContextStore`] maps a [`RunIdentity`] to its [`RunContext`]. The
//! executor never sees the backing implementation. `apply` is the only
//! mutation primitive used while a pipeline runs, and it is durable before it
//! returns.
//!
//! The store is also where invocations for one identity are serialized:
//! [`ContextStore::lease`] hands out at most one [`RunGuard`] per identity,
//! whichever executor or controller asks.

mod file;
mod locks;
mod memory;

pub use file::FileContextStore;
pub use locks::{RunGuard, RunLocks};
pub use memory::InMemoryContextStore;

use crate::context::{Checkpoint, RunContext, RunIdentity};
use crate::errors::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Key-value persistence for run contexts.
///
/// Implementations must apply mutations for one identity in the order they
/// are issued and never partially.
#[async_trait]
pub trait ContextStore: Send + Sync + Debug {
    /// The lease table for this store's runs.
    fn run_locks(&self) -> &RunLocks;

    /// Waits for the single in-flight slot for `identity`.
    ///
    /// Every caller sharing this store contends on the same lease.
    async fn lease(&self, identity: &RunIdentity) -> RunGuard {
        self.run_locks().acquire(identity).await
    }

    /// Returns true if someone holds the lease for `identity`.
    fn is_leased(&self, identity: &RunIdentity) -> bool {
        self.run_locks().is_locked(identity)
    }

    /// Returns the existing context, or atomically creates one seeded with
    /// `initial` and positioned at `start`.
    async fn get_or_create(
        &self,
        identity: &RunIdentity,
        initial: Map<String, Value>,
    ) -> Result<RunContext, StoreError>;

    /// Reads a context.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the identity is unknown.
    async fn read(&self, identity: &RunIdentity) -> Result<RunContext, StoreError>;

    /// Merges `key -> value` and moves the checkpoint to `next` in one step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the identity is unknown.
    async fn apply(
        &self,
        identity: &RunIdentity,
        key: &str,
        value: Value,
        next: Checkpoint,
    ) -> Result<RunContext, StoreError>;

    /// Clears the mapping and returns the run to `start`.
    ///
    /// Creates an empty context if the identity was never seen.
    async fn reset(&self, identity: &RunIdentity) -> Result<RunContext, StoreError>;

    /// Returns true if the identity has a context.
    async fn exists(&self, identity: &RunIdentity) -> Result<bool, StoreError> {
        match self.read(identity).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
