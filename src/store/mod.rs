//! Local Store - durable keyed record storage with live queries.
//!
//! Writes are staged in a [`Context`] and become visible only when the
//! context is saved. Each save is one commit: it is written through the
//! [`Persistence`] layer, applied to the committed state, and announced to
//! every affected observer before `save` returns.
//!
//! ## Contexts
//!
//! ```text
//!  main context ───────┐
//!  (shared, UI-facing) │  save()   ┌──────────────┐  notify  ┌────────────────┐
//!                      ├─────────▶ │  committed   │ ───────▶ │ live observers │
//!  background context ─┘           │    state     │          │ (QueryStreams) │
//!  (remote merges)                 └──────────────┘          └────────────────┘
//!
//!  temporary context: staged only, save() is a no-op
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use data_access::{LocalQuery, LocalStore, Predicate};
//!
//! let store = LocalStore::in_memory();
//! let ctx = store.main_context();
//! let mut room: Room = store.create(&ctx)?;
//! room.name = "Lobby".into();
//! ctx.upsert(&room)?;
//! store.save(&ctx)?;
//!
//! let live = store.observe::<Room>(&LocalQuery::filter(Predicate::eq("live", true)))?;
//! ```

mod observer;
mod persistence;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::StoreConfig;
use crate::error::{DataAccessError, StoreError};
use crate::query::{LocalQuery, Predicate};
use crate::record::Record;
use crate::stream::{Cancellation, QueryStream, SyncState};

use observer::{ChangeListener, ObserverRegistry, QueryObserver};

pub use observer::ObserverId;
pub use persistence::{
    BatchOp, CommitBatch, FilePersistence, InMemoryPersistence, Persistence, PersistedRecord,
};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Change notifications
// ============================================================================

/// Ids touched in one collection by one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionChanges {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl CollectionChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.inserted
            .iter()
            .chain(self.updated.iter())
            .chain(self.deleted.iter())
            .map(String::as_str)
    }
}

/// The change notification produced by one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    collections: HashMap<String, CollectionChanges>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(CollectionChanges::is_empty)
    }

    pub fn for_collection(&self, collection: &str) -> Option<&CollectionChanges> {
        self.collections.get(collection).filter(|c| !c.is_empty())
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    fn entry(&mut self, collection: &str) -> &mut CollectionChanges {
        self.collections.entry(collection.to_string()).or_default()
    }
}

// ============================================================================
// Committed state
// ============================================================================

struct StoredRecord {
    bytes: Vec<u8>,
    seq: u64,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, HashMap<String, StoredRecord>>,
    next_seq: u64,
}

/// Read access to committed state, handed to observers during a commit.
pub(crate) struct StateView<'a> {
    state: &'a State,
}

impl StateView<'_> {
    pub(crate) fn get<R: Record>(&self, id: &str) -> Result<Option<R>, StoreError> {
        self.state
            .collections
            .get(R::COLLECTION)
            .and_then(|records| records.get(id))
            .map(|stored| serde_json::from_slice(&stored.bytes).map_err(StoreError::from))
            .transpose()
    }

    /// Matching records, in insertion order unless the query sorts.
    pub(crate) fn query<R: Record>(&self, query: &LocalQuery<R>) -> Result<Vec<R>, StoreError> {
        let Some(records) = self.state.collections.get(R::COLLECTION) else {
            return Ok(Vec::new());
        };

        if let Some(id) = &query.id {
            let Some(stored) = records.get(id) else {
                return Ok(Vec::new());
            };
            let record: R = serde_json::from_slice(&stored.bytes)?;
            return Ok(if query.matches(&record) {
                vec![record]
            } else {
                Vec::new()
            });
        }

        let mut ordered: Vec<&StoredRecord> = records.values().collect();
        ordered.sort_by_key(|stored| stored.seq);

        let mut results = Vec::new();
        for stored in ordered {
            let record: R = serde_json::from_slice(&stored.bytes)?;
            if query.matches(&record) {
                results.push(record);
            }
        }
        query.order(&mut results);
        Ok(results)
    }
}

// ============================================================================
// Contexts
// ============================================================================

/// Which kind of write context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Shared, caller-facing context.
    Main,
    /// Used for merging remote results; visible to others only after save.
    Background,
    /// Scratch space; never persisted, never notifies.
    Temporary,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Main => write!(f, "main"),
            ContextKind::Background => write!(f, "background"),
            ContextKind::Temporary => write!(f, "temporary"),
        }
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Upsert(Vec<u8>),
    Delete,
}

#[derive(Default)]
struct Pending {
    changes: Vec<(String, String, Staged)>,
    index: HashMap<(String, String), usize>,
}

impl Pending {
    fn stage(&mut self, collection: &str, id: &str, staged: Staged) {
        let key = (collection.to_string(), id.to_string());
        match self.index.get(&key) {
            Some(&position) => self.changes[position].2 = staged,
            None => {
                self.index.insert(key, self.changes.len());
                self.changes
                    .push((collection.to_string(), id.to_string(), staged));
            }
        }
    }

    fn clear(&mut self) {
        self.changes.clear();
        self.index.clear();
    }
}

struct ContextInner {
    kind: ContextKind,
    store_id: u64,
    pending: Mutex<Pending>,
}

/// An isolated unit of pending writes against one [`LocalStore`].
///
/// Clones share the same pending changes. Staging the same record twice keeps
/// only the latest version.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.inner.kind)
            .field("store", &self.inner.store_id)
            .finish()
    }
}

impl Context {
    fn new(kind: ContextKind, store_id: u64) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                kind,
                store_id,
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// Stage an insert or update.
    pub fn upsert<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.pending()?
            .stage(R::COLLECTION, record.id(), Staged::Upsert(bytes));
        Ok(())
    }

    /// Stage a delete.
    pub fn delete<R: Record>(&self, id: &str) -> Result<(), StoreError> {
        self.pending()?.stage(R::COLLECTION, id, Staged::Delete);
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.inner
            .pending
            .lock()
            .map(|p| !p.changes.is_empty())
            .unwrap_or(false)
    }

    /// Number of staged changes.
    pub fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .map(|p| p.changes.len())
            .unwrap_or(0)
    }

    /// Drop every staged change.
    pub fn discard(&self) -> Result<(), StoreError> {
        self.pending()?.clear();
        Ok(())
    }

    fn pending(&self) -> Result<MutexGuard<'_, Pending>, StoreError> {
        self.inner
            .pending
            .lock()
            .map_err(|_| StoreError::LockPoisoned("context"))
    }
}

// ============================================================================
// LocalStore
// ============================================================================

struct StoreInner {
    id: u64,
    persistence: Box<dyn Persistence>,
    state: RwLock<State>,
    /// Serializes commits and observer registration.
    commit_lock: Mutex<()>,
    registry: Arc<ObserverRegistry>,
    main: Context,
}

/// Durable record storage with contexts and live queries.
///
/// Clone-friendly via Arc; clones are handles to the same store.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("id", &self.inner.id)
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}

impl LocalStore {
    /// A store backed by fresh in-memory persistence.
    pub fn in_memory() -> Self {
        Self::from_parts(Box::new(InMemoryPersistence::new()), State::default())
    }

    /// Open a store over existing persistence, loading what it holds.
    pub fn open(persistence: impl Persistence + 'static) -> Result<Self, StoreError> {
        let mut state = State::default();
        for record in persistence.load()? {
            state.next_seq = state.next_seq.max(record.seq + 1);
            state
                .collections
                .entry(record.collection)
                .or_default()
                .insert(
                    record.id,
                    StoredRecord {
                        bytes: record.bytes,
                        seq: record.seq,
                    },
                );
        }
        Ok(Self::from_parts(Box::new(persistence), state))
    }

    /// File-backed when the config names a path, in memory otherwise.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match &config.path {
            Some(path) => Self::open(FilePersistence::open(path)?),
            None => Ok(Self::in_memory()),
        }
    }

    fn from_parts(persistence: Box<dyn Persistence>, state: State) -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(StoreInner {
                id,
                persistence,
                state: RwLock::new(state),
                commit_lock: Mutex::new(()),
                registry: Arc::new(ObserverRegistry::default()),
                main: Context::new(ContextKind::Main, id),
            }),
        }
    }

    /// The shared main context.
    pub fn main_context(&self) -> Context {
        self.inner.main.clone()
    }

    pub fn new_background_context(&self) -> Context {
        Context::new(ContextKind::Background, self.inner.id)
    }

    pub fn new_temporary_context(&self) -> Context {
        Context::new(ContextKind::Temporary, self.inner.id)
    }

    /// Allocate a new record with a fresh id, staged in `ctx` but not saved.
    pub fn create<R: Record>(&self, ctx: &Context) -> Result<R, StoreError> {
        let mut record = R::default();
        record.set_id(uuid::Uuid::new_v4().to_string());
        ctx.upsert(&record)?;
        Ok(record)
    }

    /// Decode a payload into a record staged in `ctx`.
    ///
    /// Payload problems are `DataAccessError::Decode`; a record that decodes
    /// but cannot be staged is `DataAccessError::Store`.
    pub fn decode<R: Record>(&self, payload: &Value, ctx: &Context) -> Result<R, DataAccessError> {
        let record = R::decode_value(payload)?;
        ctx.upsert(&record)?;
        Ok(record)
    }

    pub fn get<R: Record>(&self, id: &str) -> Result<R, StoreError> {
        let state = self.read_state()?;
        StateView { state: &state }
            .get::<R>(id)?
            .ok_or_else(|| StoreError::NotFound {
                collection: R::COLLECTION.to_string(),
                id: id.to_string(),
            })
    }

    /// Snapshot query.
    pub fn query<R: Record>(&self, query: &LocalQuery<R>) -> Result<Vec<R>, StoreError> {
        let state = self.read_state()?;
        StateView { state: &state }.query(query)
    }

    /// Number of committed records of a type.
    pub fn count<R: Record>(&self) -> Result<usize, StoreError> {
        let state = self.read_state()?;
        Ok(state
            .collections
            .get(R::COLLECTION)
            .map_or(0, |records| records.len()))
    }

    /// Live query. The current snapshot is the stream's first item.
    pub fn observe<R: Record>(&self, query: &LocalQuery<R>) -> Result<QueryStream<R>, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancellation = Cancellation::new();
        let observer = Arc::new(QueryObserver::new(
            query.clone(),
            sender,
            cancellation.token(),
        ));

        let _commit = self.lock_commits()?;
        {
            let state = self.read_state()?;
            observer.emit(&StateView { state: &state });
        }
        let id = self.inner.registry.register(observer);
        let registry = Arc::downgrade(&self.inner.registry);
        cancellation.on_cancel(move || {
            if let Some(registry) = registry.upgrade() {
                registry.unregister(id);
            }
        });

        Ok(QueryStream::new(receiver, cancellation, SyncState::LocalOnly))
    }

    /// Register a callback for every non-empty commit.
    ///
    /// The callback runs inside the commit and must not save to this store.
    pub fn on_change<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .register(Arc::new(ChangeListener::new(callback)))
    }

    /// Remove an observer registered with [`on_change`](Self::on_change).
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Number of registered observers, live queries included.
    pub fn observer_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Commit the context's staged changes.
    ///
    /// No-op for empty or temporary contexts. On error the changes stay staged.
    pub fn save(&self, ctx: &Context) -> Result<ChangeSet, StoreError> {
        if ctx.inner.store_id != self.inner.id {
            return Err(StoreError::Storage(
                "context belongs to a different store".into(),
            ));
        }
        if ctx.kind() == ContextKind::Temporary {
            return Ok(ChangeSet::default());
        }

        // Held for the whole commit: one save per context at a time.
        let mut pending = ctx.pending()?;
        if pending.changes.is_empty() {
            return Ok(ChangeSet::default());
        }
        let changes = self.commit(&pending.changes)?;
        pending.clear();
        tracing::debug!(context = %ctx.kind(), "context saved");
        Ok(changes)
    }

    /// Delete every record of `R` matching the predicate (all when `None`), in one commit.
    pub fn delete_all<R: Record>(&self, predicate: Option<&Predicate>) -> Result<usize, StoreError> {
        let query = LocalQuery::<R> {
            predicate: predicate.cloned(),
            ..LocalQuery::default()
        };
        self.delete_where(&query)
    }

    /// Delete every record of `R` matching the query, in one commit.
    ///
    /// The query runs under the commit lock, so the deleted set is exactly what
    /// matched when the delete was applied.
    pub fn delete_where<R: Record>(&self, query: &LocalQuery<R>) -> Result<usize, StoreError> {
        let commit = self.lock_commits()?;
        let doomed: Vec<(String, String, Staged)> = {
            let state = self.read_state()?;
            StateView { state: &state }
                .query(query)?
                .iter()
                .map(|record| {
                    (
                        R::COLLECTION.to_string(),
                        record.id().to_string(),
                        Staged::Delete,
                    )
                })
                .collect()
        };
        if doomed.is_empty() {
            return Ok(0);
        }
        let changes = self.commit_locked(&commit, &doomed)?;
        Ok(changes
            .for_collection(R::COLLECTION)
            .map_or(0, |c| c.deleted.len()))
    }

    fn commit(&self, staged: &[(String, String, Staged)]) -> Result<ChangeSet, StoreError> {
        let commit = self.lock_commits()?;
        self.commit_locked(&commit, staged)
    }

    /// Apply `staged` as one commit. The caller holds the commit lock.
    fn commit_locked(
        &self,
        _commit: &MutexGuard<'_, ()>,
        staged: &[(String, String, Staged)],
    ) -> Result<ChangeSet, StoreError> {
        let mut batch = CommitBatch::default();
        let mut changes = ChangeSet::default();
        {
            let state = self.read_state()?;
            let mut next_seq = state.next_seq;
            for (collection, id, change) in staged {
                let existing = state
                    .collections
                    .get(collection)
                    .and_then(|records| records.get(id));
                match (change, existing) {
                    (Staged::Upsert(bytes), Some(current)) => {
                        changes.entry(collection).updated.push(id.clone());
                        batch.ops.push(BatchOp::Put(PersistedRecord {
                            collection: collection.clone(),
                            id: id.clone(),
                            seq: current.seq,
                            bytes: bytes.clone(),
                        }));
                    }
                    (Staged::Upsert(bytes), None) => {
                        changes.entry(collection).inserted.push(id.clone());
                        batch.ops.push(BatchOp::Put(PersistedRecord {
                            collection: collection.clone(),
                            id: id.clone(),
                            seq: next_seq,
                            bytes: bytes.clone(),
                        }));
                        next_seq += 1;
                    }
                    (Staged::Delete, Some(_)) => {
                        changes.entry(collection).deleted.push(id.clone());
                        batch.ops.push(BatchOp::Remove {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    }
                    (Staged::Delete, None) => {}
                }
            }
        }

        if batch.is_empty() {
            return Ok(changes);
        }

        self.inner.persistence.write(&batch)?;

        {
            let mut state = self
                .inner
                .state
                .write()
                .map_err(|_| StoreError::LockPoisoned("commit"))?;
            for op in batch.ops {
                match op {
                    BatchOp::Put(record) => {
                        state.next_seq = state.next_seq.max(record.seq + 1);
                        state
                            .collections
                            .entry(record.collection)
                            .or_default()
                            .insert(
                                record.id,
                                StoredRecord {
                                    bytes: record.bytes,
                                    seq: record.seq,
                                },
                            );
                    }
                    BatchOp::Remove { collection, id } => {
                        if let Some(records) = state.collections.get_mut(&collection) {
                            records.remove(&id);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            collections = ?changes.collections().collect::<Vec<_>>(),
            "commit applied"
        );

        let state = self.read_state()?;
        self.inner
            .registry
            .notify(&StateView { state: &state }, &changes);
        Ok(changes)
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.inner
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))
    }

    fn lock_commits(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.inner
            .commit_lock
            .lock()
            .map_err(|_| StoreError::LockPoisoned("commit"))
    }
}
