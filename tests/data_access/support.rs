//! Test doubles: a scripted remote client and a persistence layer that can be made to fail.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use data_access::store::{CommitBatch, PersistedRecord};
use data_access::rooms::Room;
use data_access::{
    InMemoryPersistence, LocalStore, Persistence, RemoteClient, RemoteFailure, RemoteOperation,
    StoreError,
};
use serde_json::{json, Value};
use tokio::sync::watch;

/// Remote client that replays queued responses in order.
///
/// Clones share the script, so a test can keep one handle for assertions
/// after handing another to `DataAccess`.
#[derive(Clone)]
pub struct ScriptedRemote {
    inner: Arc<ScriptedInner>,
}

struct ScriptedInner {
    responses: Mutex<VecDeque<Result<Value, RemoteFailure>>>,
    calls: Mutex<Vec<RemoteOperation>>,
    gate: watch::Sender<bool>,
}

impl ScriptedRemote {
    /// Responds as soon as it is called.
    pub fn new() -> Self {
        let remote = Self::gated();
        remote.open();
        remote
    }

    /// Holds every call until [`open`](Self::open).
    pub fn gated() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScriptedInner {
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                gate,
            }),
        }
    }

    pub fn respond(self, response: Result<Value, RemoteFailure>) -> Self {
        self.inner.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn respond_ok(self, body: Value) -> Self {
        self.respond(Ok(body))
    }

    pub fn respond_status(self, status: u16) -> Self {
        self.respond(Err(RemoteFailure::from_status(status)))
    }

    pub fn open(&self) {
        self.inner.gate.send_replace(true);
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RemoteOperation> {
        self.inner.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn execute(&self, operation: &RemoteOperation) -> Result<Value, RemoteFailure> {
        self.inner.calls.lock().unwrap().push(operation.clone());
        let mut gate = self.inner.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| RemoteFailure::Network("gate dropped".into()))?;
        self.inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }
}

/// In-memory persistence whose writes fail while `failing` is set.
#[derive(Clone, Default)]
pub struct FlakyPersistence {
    inner: InMemoryPersistence,
    failing: Arc<AtomicBool>,
}

impl FlakyPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Persistence for FlakyPersistence {
    fn load(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        self.inner.load()
    }

    fn write(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.inner.write(batch)
    }
}

pub fn room(id: &str, name: &str, live: bool) -> Room {
    Room {
        id: id.into(),
        name: name.into(),
        live,
        ..Room::default()
    }
}

pub fn room_json(id: &str, name: &str, live: bool) -> Value {
    json!({ "id": id, "name": name, "isLive": live })
}

/// Commit `rooms` through the main context.
pub fn seed(store: &LocalStore, rooms: &[Room]) {
    let ctx = store.main_context();
    for r in rooms {
        ctx.upsert(r).unwrap();
    }
    store.save(&ctx).unwrap();
}

pub fn ids(rooms: &[Room]) -> Vec<&str> {
    rooms.iter().map(|r| r.id.as_str()).collect()
}
