//! Observer registry: typed live queries notified inside the commit that changed them.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChangeSet, StateView};
use crate::error::DataAccessError;
use crate::query::LocalQuery;
use crate::record::Record;
use crate::stream::StreamItem;

/// Handle for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

pub(crate) trait Observer: Send + Sync {
    /// Collection this observer watches; `None` watches every collection.
    fn collection(&self) -> Option<&str>;

    fn notify(&self, view: &StateView<'_>, changes: &ChangeSet);
}

/// Registered observers, delivered to in registration order.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<BTreeMap<ObserverId, Arc<dyn Observer>>>,
}

impl ObserverRegistry {
    pub(crate) fn register(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut observers) = self.observers.write() {
            observers.insert(id, observer);
        }
        id
    }

    pub(crate) fn unregister(&self, id: ObserverId) -> bool {
        self.observers
            .write()
            .map(|mut observers| observers.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub(crate) fn notify(&self, view: &StateView<'_>, changes: &ChangeSet) {
        // Snapshot the list so observers may unregister while being notified.
        let targets: Vec<Arc<dyn Observer>> = match self.observers.read() {
            Ok(observers) => observers
                .values()
                .filter(|o| {
                    o.collection()
                        .map_or(true, |c| changes.for_collection(c).is_some())
                })
                .cloned()
                .collect(),
            Err(_) => return,
        };
        for observer in targets {
            observer.notify(view, changes);
        }
    }
}

/// A live query over one record type, feeding a [`QueryStream`](crate::QueryStream).
pub(crate) struct QueryObserver<R: Record> {
    query: LocalQuery<R>,
    last_ids: Mutex<HashSet<String>>,
    sender: mpsc::UnboundedSender<StreamItem<R>>,
    token: CancellationToken,
}

impl<R: Record> QueryObserver<R> {
    pub(crate) fn new(
        query: LocalQuery<R>,
        sender: mpsc::UnboundedSender<StreamItem<R>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            query,
            last_ids: Mutex::new(HashSet::new()),
            sender,
            token,
        }
    }

    /// Run the query and push the snapshot. Returns false once nobody is listening.
    pub(crate) fn emit(&self, view: &StateView<'_>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let item = match view.query::<R>(&self.query) {
            Ok(records) => {
                if let Ok(mut last) = self.last_ids.lock() {
                    *last = records.iter().map(|r| r.id().to_string()).collect();
                }
                tracing::trace!(
                    collection = R::COLLECTION,
                    count = records.len(),
                    "delivering snapshot"
                );
                Ok(records)
            }
            Err(err) => Err(DataAccessError::Store(err)),
        };
        self.sender.send(item).is_ok()
    }

    /// Whether the commit could have changed this query's result set.
    fn affected(&self, view: &StateView<'_>, changes: &ChangeSet) -> bool {
        let Some(changes) = changes.for_collection(R::COLLECTION) else {
            return false;
        };
        let Ok(last) = self.last_ids.lock() else {
            return true;
        };
        if changes.ids().any(|id| last.contains(id)) {
            return true;
        }
        changes
            .inserted
            .iter()
            .chain(changes.updated.iter())
            .any(|id| match view.get::<R>(id) {
                Ok(Some(record)) => self.query.matches(&record),
                Ok(None) => false,
                Err(_) => true,
            })
    }
}

impl<R: Record> Observer for QueryObserver<R> {
    fn collection(&self) -> Option<&str> {
        Some(R::COLLECTION)
    }

    fn notify(&self, view: &StateView<'_>, changes: &ChangeSet) {
        if self.token.is_cancelled() {
            return;
        }
        if !self.affected(view, changes) {
            tracing::trace!(collection = R::COLLECTION, "commit does not touch query");
            return;
        }
        self.emit(view);
    }
}

/// A plain callback receiving every change set.
pub(crate) struct ChangeListener<F> {
    callback: F,
}

impl<F> ChangeListener<F> {
    pub(crate) fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Observer for ChangeListener<F>
where
    F: Fn(&ChangeSet) + Send + Sync,
{
    fn collection(&self) -> Option<&str> {
        None
    }

    fn notify(&self, _view: &StateView<'_>, changes: &ChangeSet) {
        (self.callback)(changes);
    }
}
