//! Filesystem-backed context store.
//!
//! One JSON document per run, named by the identity's storage key:
//!
//! - `<key>.json`: the current context
//! - `<key>.backup.json`: the previous version
//! - `<key>.tmp.json`: scratch file for the next version
//!
//! A write goes to the scratch file, is synced, then renamed over the
//! current document. The previous document is copied to the backup first,
//! and the backup is read when the current document cannot be decoded. A
//! document that cannot be read at all is an IO error, never a fallback.
//!
//! Every store opened on the same directory within a process shares one set
//! of leases and write locks.

use super::{ContextStore, RunLocks};
use crate::context::{Checkpoint, RunContext, RunIdentity};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};
use tracing::{debug, warn};

/// Lock tables for one store directory.
#[derive(Debug, Default)]
struct DirLocks {
    leases: RunLocks,
    writes: RunLocks,
}

/// Open directories, keyed by canonical path.
static OPEN_DIRS: LazyLock<DashMap<PathBuf, Weak<DirLocks>>> = LazyLock::new(DashMap::new);

fn dir_locks(canonical: PathBuf) -> Arc<DirLocks> {
    OPEN_DIRS.retain(|_, locks| locks.strong_count() > 0);
    let mut entry = OPEN_DIRS.entry(canonical).or_default();
    if let Some(locks) = entry.upgrade() {
        return locks;
    }
    let locks = Arc::new(DirLocks::default());
    *entry = Arc::downgrade(&locks);
    locks
}

/// A context store that persists each run as a JSON file.
#[derive(Debug)]
pub struct FileContextStore {
    dir: PathBuf,
    locks: Arc<DirLocks>,
}

#[derive(Debug, Clone)]
struct RunFiles {
    dir: PathBuf,
    primary: PathBuf,
    backup: PathBuf,
    scratch: PathBuf,
}

impl RunFiles {
    fn new(dir: &Path, key: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            primary: dir.join(format!("{key}.json")),
            backup: dir.join(format!("{key}.backup.json")),
            scratch: dir.join(format!("{key}.tmp.json")),
        }
    }
}

impl FileContextStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("creating store dir", e))?;
        let canonical =
            fs::canonicalize(&dir).map_err(|e| StoreError::io("resolving store dir", e))?;
        Ok(Self {
            dir,
            locks: dir_locks(canonical),
        })
    }

    /// The directory the store writes into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the current document for `identity`.
    #[must_use]
    pub fn path_for(&self, identity: &RunIdentity) -> PathBuf {
        RunFiles::new(&self.dir, &identity.storage_key()).primary
    }

    /// Runs a blocking load-modify-store operation under the run's lock.
    async fn with_run<T, F>(&self, identity: &RunIdentity, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&RunFiles, &RunIdentity) -> Result<T, StoreError> + Send + 'static,
    {
        let _guard = self.locks.writes.acquire(identity).await;

        let files = RunFiles::new(&self.dir, &identity.storage_key());
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || op(&files, &identity))
            .await
            .map_err(|e| StoreError::Internal(format!("store task failed: {e}")))?
    }
}

/// Why a document could not be turned into a context.
enum DecodeError {
    /// The bytes could not be read.
    Io(io::Error),
    /// The bytes were read but are not this run's context.
    Invalid(String),
}

fn decode(path: &Path, identity: &RunIdentity) -> Result<RunContext, DecodeError> {
    let file = File::open(path).map_err(DecodeError::Io)?;
    let ctx: RunContext = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        if e.is_io() {
            DecodeError::Io(e.into())
        } else {
            DecodeError::Invalid(e.to_string())
        }
    })?;
    if &ctx.identity != identity {
        return Err(DecodeError::Invalid(format!(
            "document belongs to {}",
            ctx.identity
        )));
    }
    Ok(ctx)
}

fn load(files: &RunFiles, identity: &RunIdentity) -> Result<Option<RunContext>, StoreError> {
    if !files.primary.exists() {
        if files.backup.exists() {
            warn!(run = %identity, "Primary context missing, recovering from backup");
            return load_backup(files, identity, "primary missing").map(Some);
        }
        return Ok(None);
    }

    match decode(&files.primary, identity) {
        Ok(ctx) => Ok(Some(ctx)),
        Err(DecodeError::Io(e)) => Err(StoreError::io("reading context", e)),
        Err(DecodeError::Invalid(reason)) => {
            warn!(
                run = %identity,
                error = %reason,
                "Context document undecodable, trying backup"
            );
            load_backup(files, identity, &reason).map(Some)
        }
    }
}

fn load_backup(
    files: &RunFiles,
    identity: &RunIdentity,
    primary_reason: &str,
) -> Result<RunContext, StoreError> {
    match decode(&files.backup, identity) {
        Ok(ctx) => Ok(ctx),
        Err(DecodeError::Io(e)) if e.kind() != io::ErrorKind::NotFound => {
            Err(StoreError::io("reading backup context", e))
        }
        Err(DecodeError::Io(e)) => Err(StoreError::Corrupt {
            identity: identity.clone(),
            reason: format!("{primary_reason}; backup: {e}"),
        }),
        Err(DecodeError::Invalid(reason)) => Err(StoreError::Corrupt {
            identity: identity.clone(),
            reason: format!("{primary_reason}; backup: {reason}"),
        }),
    }
}

fn store(files: &RunFiles, ctx: &RunContext) -> Result<(), StoreError> {
    if files.primary.exists() {
        fs::copy(&files.primary, &files.backup)
            .map_err(|e| StoreError::io("backing up context", e))?;
    }

    let file =
        File::create(&files.scratch).map_err(|e| StoreError::io("creating temp context", e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, ctx)?;
    writer
        .flush()
        .map_err(|e| StoreError::io("writing temp context", e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StoreError::io("syncing temp context", e))?;
    drop(writer);

    fs::rename(&files.scratch, &files.primary)
        .map_err(|e| StoreError::io("renaming context", e))?;
    sync_dir(&files.dir)?;

    debug!(run = %ctx.identity, revision = ctx.revision, "Context persisted");
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io("syncing store dir", e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[async_trait]
impl ContextStore for FileContextStore {
    fn run_locks(&self) -> &RunLocks {
        &self.locks.leases
    }

    async fn get_or_create(
        &self,
        identity: &RunIdentity,
        initial: Map<String, Value>,
    ) -> Result<RunContext, StoreError> {
        self.with_run(identity, move |files, identity| {
            if let Some(ctx) = load(files, identity)? {
                return Ok(ctx);
            }
            let ctx = RunContext::new(identity.clone(), initial);
            store(files, &ctx)?;
            Ok(ctx)
        })
        .await
    }

    async fn read(&self, identity: &RunIdentity) -> Result<RunContext, StoreError> {
        self.with_run(identity, |files, identity| {
            load(files, identity)?.ok_or_else(|| StoreError::not_found(identity))
        })
        .await
    }

    async fn apply(
        &self,
        identity: &RunIdentity,
        key: &str,
        value: Value,
        next: Checkpoint,
    ) -> Result<RunContext, StoreError> {
        let key = key.to_string();
        self.with_run(identity, move |files, identity| {
            let mut ctx = load(files, identity)?.ok_or_else(|| StoreError::not_found(identity))?;
            ctx.apply(key, value, next);
            store(files, &ctx)?;
            Ok(ctx)
        })
        .await
    }

    async fn reset(&self, identity: &RunIdentity) -> Result<RunContext, StoreError> {
        self.with_run(identity, |files, identity| {
            let mut ctx = match load(files, identity) {
                Ok(Some(ctx)) => ctx,
                Ok(None) => RunContext::new(identity.clone(), Map::new()),
                Err(err) => {
                    warn!(run = %identity, error = %err, "Discarding unreadable context on reset");
                    RunContext::new(identity.clone(), Map::new())
                }
            };
            ctx.reset();
            store(files, &ctx)?;
            Ok(ctx)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn identity() -> RunIdentity {
        RunIdentity::new("codegen", "alice", "s1")
    }

    #[tokio::test]
    async fn test_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let id = identity();

        {
            let store = FileContextStore::open(dir.path()).unwrap();
            store.get_or_create(&id, Map::new()).await.unwrap();
            store
                .apply(&id, "generated_code", json!("fn a() {}"), Checkpoint::stage("review"))
                .await
                .unwrap();
        }

        let store = FileContextStore::open(dir.path()).unwrap();
        let ctx = store.read(&id).await.unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::stage("review"));
        assert_eq!(ctx.get("generated_code"), Some(&json!("fn a() {}")));
        assert_eq!(ctx.revision, 1);
    }

    #[tokio::test]
    async fn test_read_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        assert!(store.read(&identity()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_no_scratch_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let id = identity();
        store.get_or_create(&id, Map::new()).await.unwrap();
        store.apply(&id, "k", json!(1), Checkpoint::Complete).await.unwrap();

        let files = RunFiles::new(dir.path(), &id.storage_key());
        assert!(files.primary.exists());
        assert!(files.backup.exists());
        assert!(!files.scratch.exists());
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let id = identity();
        store.get_or_create(&id, Map::new()).await.unwrap();
        store
            .apply(&id, "generated_code", json!("v1"), Checkpoint::stage("review"))
            .await
            .unwrap();
        store
            .apply(&id, "review_comments", json!("v2"), Checkpoint::stage("refactor"))
            .await
            .unwrap();

        fs::write(store.path_for(&id), b"{ not json").unwrap();

        let ctx = store.read(&id).await.unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::stage("review"));
        assert!(!ctx.contains_key("review_comments"));
    }

    #[tokio::test]
    async fn test_corrupt_without_backup_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let id = identity();
        fs::write(store.path_for(&id), b"garbage").unwrap();

        let err = store.read(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_reset_recovers_from_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let id = identity();
        fs::write(store.path_for(&id), b"garbage").unwrap();

        let ctx = store.reset(&id).await.unwrap();
        assert_eq!(ctx.checkpoint, Checkpoint::Start);
        assert_eq!(store.read(&id).await.unwrap().checkpoint, Checkpoint::Start);
    }

    #[tokio::test]
    async fn test_identity_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let other = RunIdentity::new("codegen", "bob", "s1");
        store.get_or_create(&other, Map::new()).await.unwrap();

        fs::copy(store.path_for(&other), store.path_for(&identity())).unwrap();

        let err = store.read(&identity()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_primary_is_io_error_not_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        let id = identity();
        store.get_or_create(&id, Map::new()).await.unwrap();
        store
            .apply(&id, "generated_code", json!("v1"), Checkpoint::stage("review"))
            .await
            .unwrap();

        // A directory in place of the document opens but fails on read.
        let primary = store.path_for(&id);
        fs::remove_file(&primary).unwrap();
        fs::create_dir(&primary).unwrap();

        let err = store.read(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "{err}");
        let err = store
            .apply(&id, "review_comments", json!("v2"), Checkpoint::stage("refactor"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_stores_on_one_dir_share_leases() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileContextStore::open(dir.path()).unwrap();
        let b = FileContextStore::open(dir.path().join(".")).unwrap();
        let id = identity();

        let lease = a.lease(&id).await;
        assert!(b.is_leased(&id));
        assert!(b.run_locks().try_acquire(&id).is_none());

        drop(lease);
        assert!(!b.is_leased(&id));
    }

    #[tokio::test]
    async fn test_write_locks_are_released_after_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::open(dir.path()).unwrap();
        for i in 0..20 {
            let id = RunIdentity::new("codegen", "alice", format!("s{i}"));
            store.get_or_create(&id, Map::new()).await.unwrap();
            store.apply(&id, "k", json!(i), Checkpoint::Complete).await.unwrap();
        }
        assert!(store.locks.writes.is_empty());
        assert!(store.locks.leases.is_empty());
    }
}
