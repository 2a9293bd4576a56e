//! Durable backing for the local store.
//!
//! The store keeps its committed state in memory and writes every commit
//! through a [`Persistence`] before applying it. Entries are keyed by
//! `"collection:id"` and carry the serialized record plus its insertion sequence.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One stored record as the persistence layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub collection: String,
    pub id: String,
    /// Insertion sequence; defines the default result order.
    pub seq: u64,
    /// JSON-serialized record.
    pub bytes: Vec<u8>,
}

impl PersistedRecord {
    pub fn key(&self) -> String {
        make_key(&self.collection, &self.id)
    }
}

/// A single write within a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(PersistedRecord),
    Remove { collection: String, id: String },
}

/// Everything one commit writes, applied atomically by the persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub ops: Vec<BatchOp>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Durable storage for committed records.
pub trait Persistence: Send + Sync {
    /// Load every persisted record. Called once when the store opens.
    fn load(&self) -> Result<Vec<PersistedRecord>, StoreError>;

    /// Durably apply a commit. On error nothing from the batch may be visible.
    fn write(&self, batch: &CommitBatch) -> Result<(), StoreError>;
}

pub(crate) fn make_key(collection: &str, id: &str) -> String {
    format!("{}:{}", collection, id)
}

fn apply(entries: &mut HashMap<String, PersistedRecord>, batch: &CommitBatch) {
    for op in &batch.ops {
        match op {
            BatchOp::Put(record) => {
                entries.insert(record.key(), record.clone());
            }
            BatchOp::Remove { collection, id } => {
                entries.remove(&make_key(collection, id));
            }
        }
    }
}

/// HashMap-backed persistence for testing and ephemeral stores.
///
/// Clone-friendly via Arc; clones share entries, so a second store opened on a
/// clone sees what the first one committed.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    entries: Arc<RwLock<HashMap<String, PersistedRecord>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Persistence for InMemoryPersistence {
    fn load(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned("persistence load"))?;
        Ok(entries.values().cloned().collect())
    }

    fn write(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::LockPoisoned("persistence write"))?;
        apply(&mut entries, batch);
        Ok(())
    }
}

/// Flat-file persistence.
///
/// The file holds a bitcode-encoded list of [`PersistedRecord`]s. Each commit
/// rewrites it through a sibling temp file followed by a rename, so a crash
/// leaves either the old or the new contents.
pub struct FilePersistence {
    path: PathBuf,
    entries: RwLock<HashMap<String, PersistedRecord>>,
}

impl FilePersistence {
    /// Open (or prepare to create) the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_file(&path)?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl ToString) -> StoreError {
        StoreError::Persistence {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn flush(&self, entries: &HashMap<String, PersistedRecord>) -> Result<(), StoreError> {
        let mut records: Vec<&PersistedRecord> = entries.values().collect();
        records.sort_by(|a, b| (&a.collection, a.seq).cmp(&(&b.collection, b.seq)));
        let bytes = bitcode::serialize(&records).map_err(|e| self.error(e))?;

        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        let mut file = fs::File::create(&tmp).map_err(|e| self.error(e))?;
        file.write_all(&bytes).map_err(|e| self.error(e))?;
        file.sync_all().map_err(|e| self.error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.error(e))?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Vec<PersistedRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::Persistence {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };
    bitcode::deserialize(&bytes).map_err(|e| StoreError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

impl Persistence for FilePersistence {
    fn load(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned("file load"))?;
        Ok(entries.values().cloned().collect())
    }

    fn write(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::LockPoisoned("file write"))?;
        let mut next = entries.clone();
        apply(&mut next, batch);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}
