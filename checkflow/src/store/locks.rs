//! Per-identity leases.
//!
//! Every [`ContextStore`](super::ContextStore) owns a [`RunLocks`] table, so
//! executors and controllers sharing a store also share its leases.

use crate::context::RunIdentity;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Table = Arc<DashMap<RunIdentity, Arc<Mutex<()>>>>;

/// A table of async mutexes, one per run identity.
///
/// Different identities never contend. A second caller for the same
/// identity waits until the first releases its [`RunGuard`]. An entry lives
/// only while someone holds or waits on it.
#[derive(Debug, Default)]
pub struct RunLocks {
    table: Table,
}

/// Proof that the holder owns the single in-flight slot for one identity.
#[derive(Debug)]
pub struct RunGuard {
    identity: RunIdentity,
    guard: Option<OwnedMutexGuard<()>>,
    table: Table,
}

impl RunGuard {
    /// The identity this guard serializes.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own handle left means nobody is waiting.
        self.table
            .remove_if(&self.identity, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl RunLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, identity: &RunIdentity) -> Arc<Mutex<()>> {
        self.table
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, identity: &RunIdentity, guard: OwnedMutexGuard<()>) -> RunGuard {
        RunGuard {
            identity: identity.clone(),
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Waits for and takes the lock for `identity`.
    pub async fn acquire(&self, identity: &RunIdentity) -> RunGuard {
        let guard = self.mutex_for(identity).lock_owned().await;
        self.guard(identity, guard)
    }

    /// Takes the lock only if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self, identity: &RunIdentity) -> Option<RunGuard> {
        self.mutex_for(identity)
            .try_lock_owned()
            .ok()
            .map(|guard| self.guard(identity, guard))
    }

    /// Returns true if an invocation currently holds the lock.
    #[must_use]
    pub fn is_locked(&self, identity: &RunIdentity) -> bool {
        self.table
            .get(identity)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Number of identities currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity(session: &str) -> RunIdentity {
        RunIdentity::new("app", "user", session)
    }

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = RunLocks::new();
        let guard = locks.acquire(&identity("a")).await;

        assert!(locks.is_locked(&identity("a")));
        assert!(locks.try_acquire(&identity("a")).is_none());
        assert_eq!(guard.identity(), &identity("a"));

        drop(guard);
        assert!(!locks.is_locked(&identity("a")));
        assert!(locks.try_acquire(&identity("a")).is_some());
    }

    #[tokio::test]
    async fn test_different_identities_do_not_contend() {
        let locks = RunLocks::new();
        let _a = locks.acquire(&identity("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(&identity("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(RunLocks::new());
        let guard = locks.acquire(&identity("a")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(&identity("a")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_released_entries_are_removed() {
        let locks = RunLocks::new();
        let held = locks.acquire(&identity("held")).await;
        for i in 0..100 {
            drop(locks.acquire(&identity(&format!("s{i}"))).await);
        }
        assert_eq!(locks.len(), 1);
        assert!(locks.is_locked(held.identity()));

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_try_acquire_leaves_entry_to_holder() {
        let locks = RunLocks::new();
        let held = locks.acquire(&identity("a")).await;
        assert!(locks.try_acquire(&identity("a")).is_none());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }
}
