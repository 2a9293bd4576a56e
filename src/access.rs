//! Data Access Coordinator: fetch, save and delete across the local store and a remote source.
//!
//! ## Fetch cases
//!
//! ```text
//!  local  remote   behaviour
//!  ─────  ──────   ──────────────────────────────────────────────────────────
//!   no     no      stream fails with InvalidRequest, nothing is touched
//!   no     yes     remote call, decode into a temporary context, emit once, end
//!   yes    no      live local stream
//!   yes    yes     live local stream now; remote result merged through a
//!                  background context, picked up by the live stream; remote
//!                  failures go to `remote_errors()`, never to the stream
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let access = DataAccess::new(LocalStore::in_memory(), HttpRemoteClient::new(&config.remote)?);
//! let mut rooms = access.fetch(RoomRequests::my_rooms_live());
//! while let Some(snapshot) = rooms.next().await {
//!     render(snapshot?);
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::error::{DataAccessError, StoreError};
use crate::query::LocalQuery;
use crate::record::Record;
use crate::remote::{RemoteClient, RemoteFailure};
use crate::request::{AccessRequest, RemoteOperation, StorageLocation};
use crate::store::LocalStore;
use crate::stream::{Cancellation, QueryStream, SyncState};

/// Coordinates one local store with one remote client.
///
/// Clone-friendly; clones share the store, the client and the error side channel.
pub struct DataAccess<C> {
    store: LocalStore,
    remote: Arc<C>,
    remote_errors: Arc<watch::Sender<Option<DataAccessError>>>,
}

impl<C> Clone for DataAccess<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            remote_errors: Arc::clone(&self.remote_errors),
        }
    }
}

impl<C> fmt::Debug for DataAccess<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataAccess")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteClient + 'static> DataAccess<C> {
    pub fn new(store: LocalStore, remote: C) -> Self {
        let (remote_errors, _) = watch::channel(None);
        Self {
            store,
            remote: Arc::new(remote),
            remote_errors: Arc::new(remote_errors),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> &C {
        &self.remote
    }

    /// Last remote failure that was not surfaced through a stream or return value.
    ///
    /// Set when a background refresh or a best-effort remote write fails,
    /// cleared by the next successful remote call.
    pub fn remote_errors(&self) -> watch::Receiver<Option<DataAccessError>> {
        self.remote_errors.subscribe()
    }

    /// A new record with a fresh id.
    ///
    /// Allocated in a scratch context, so nothing is staged for the store
    /// until the record is passed to [`save`](Self::save).
    pub fn create<R: Record>(&self) -> Result<R, DataAccessError> {
        Ok(self.store.create(&self.store.new_temporary_context())?)
    }

    /// Open a Query Result Stream for the request.
    ///
    /// A request naming a remote operation needs a Tokio runtime; without one
    /// the stream fails with [`DataAccessError::NoRuntime`].
    pub fn fetch<R: Record>(&self, request: AccessRequest<R>) -> QueryStream<R> {
        match (request.local, request.remote) {
            (None, None) => QueryStream::failed(DataAccessError::InvalidRequest {
                record_type: R::COLLECTION,
            }),
            (local, Some(operation)) => {
                let Ok(runtime) = Handle::try_current() else {
                    return QueryStream::failed(DataAccessError::NoRuntime);
                };
                match local {
                    Some(query) => self.fetch_reconciling(&runtime, query, operation),
                    None => self.fetch_remote(&runtime, operation),
                }
            }
            (Some(query), None) => match self.store.observe(&query) {
                Ok(stream) => stream,
                Err(err) => QueryStream::failed(err.into()),
            },
        }
    }

    /// Fetch a single record.
    ///
    /// With both sources, a remote failure falls back to the local copy and is
    /// reported on [`remote_errors`](Self::remote_errors); the remote error is
    /// returned only when there is no local copy.
    pub async fn fetch_one<R: Record>(&self, request: AccessRequest<R>) -> Result<R, DataAccessError> {
        match (request.local, request.remote) {
            (None, None) => Err(DataAccessError::InvalidRequest {
                record_type: R::COLLECTION,
            }),
            (Some(query), None) => self.first_local(&query),
            (None, Some(operation)) => {
                let payload = self.remote.execute(&operation).await?;
                decode_one(&self.store, &payload)
            }
            (Some(query), Some(operation)) => match self.remote.execute(&operation).await {
                Ok(payload) => {
                    match merge::<R>(&self.store, &payload) {
                        Ok(_) => self.clear_remote_error(),
                        Err(err) => self.report_remote_error(&operation, err),
                    }
                    self.first_local(&query)
                }
                Err(failure) => {
                    let error = DataAccessError::Remote(failure);
                    self.report_remote_error(&operation, error.clone());
                    match self.first_local(&query) {
                        Err(DataAccessError::Store(StoreError::NotFound { .. })) => Err(error),
                        other => other,
                    }
                }
            },
        }
    }

    /// Write the request's attached record.
    ///
    /// A named remote operation runs first. Its failure aborts the save unless
    /// the request is `LocalOnly`, in which case it is only reported on
    /// [`remote_errors`](Self::remote_errors).
    pub async fn save<R: Record>(&self, request: AccessRequest<R>) -> Result<(), DataAccessError> {
        request.validate()?;
        let location = request.location;
        let mut record = request.record().cloned();

        if let Some(operation) = &request.remote {
            match self.remote.execute(operation).await {
                Ok(response) => {
                    self.clear_remote_error();
                    if location == StorageLocation::Both {
                        record = server_version(record, &response);
                    }
                }
                Err(failure) if location.requires_remote() => return Err(failure.into()),
                Err(failure) => self.report_remote_error(operation, failure.into()),
            }
        }

        if !location.writes_local() {
            return Ok(());
        }
        let Some(record) = record else {
            return Ok(());
        };
        let ctx = self.store.main_context();
        ctx.upsert(&record)?;
        self.store.save(&ctx)?;
        Ok(())
    }

    /// Delete the records matched by the request's local query (all of the type when absent).
    ///
    /// A named remote delete runs first; the local delete follows if it
    /// succeeded, or regardless when the request is `LocalOnly`. Returns the
    /// number of records removed locally.
    pub async fn delete<R: Record>(&self, request: AccessRequest<R>) -> Result<usize, DataAccessError> {
        request.validate()?;
        let location = request.location;

        if let Some(operation) = request.remote.as_ref().filter(|op| op.is_delete()) {
            match self.remote.execute(operation).await {
                Ok(_) => self.clear_remote_error(),
                Err(failure) if location.requires_remote() => return Err(failure.into()),
                Err(failure) => self.report_remote_error(operation, failure.into()),
            }
        }

        if !location.writes_local() {
            return Ok(0);
        }
        let query = request.local.unwrap_or_default();
        Ok(self.store.delete_where(&query)?)
    }

    fn fetch_remote<R: Record>(&self, runtime: &Handle, operation: RemoteOperation) -> QueryStream<R> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancellation = Cancellation::new();
        let stream = QueryStream::new(receiver, cancellation.clone(), SyncState::RemotePending);
        let sync = stream.sync_handle();
        let token = cancellation.token();
        let remote = Arc::clone(&self.remote);
        let store = self.store.clone();

        runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%operation, "remote fetch cancelled while in flight");
                    return;
                }
                outcome = remote.execute(&operation) => outcome,
            };
            if token.is_cancelled() {
                tracing::debug!(%operation, "discarding stale remote result");
                return;
            }
            let item = outcome
                .map_err(DataAccessError::from)
                .and_then(|payload| decode_all::<R>(&store, &payload));
            let state = if item.is_ok() {
                SyncState::RemoteApplied
            } else {
                SyncState::RemoteFailed
            };
            let _ = sender.send(item);
            sync.set(state);
        });

        stream
    }

    fn fetch_reconciling<R: Record>(
        &self,
        runtime: &Handle,
        query: LocalQuery<R>,
        operation: RemoteOperation,
    ) -> QueryStream<R> {
        let stream = match self.store.observe(&query) {
            Ok(stream) => stream,
            Err(err) => return QueryStream::failed(err.into()),
        };
        let sync = stream.sync_handle();
        sync.set(SyncState::RemotePending);

        let token = stream.cancellation().token();
        let this = self.clone();
        runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%operation, "reconciliation cancelled while in flight");
                    return;
                }
                outcome = this.remote.execute(&operation) => outcome,
            };
            if token.is_cancelled() {
                tracing::debug!(%operation, "discarding stale remote result");
                return;
            }
            let merged = outcome
                .map_err(DataAccessError::from)
                .and_then(|payload| merge::<R>(&this.store, &payload));
            match merged {
                Ok(count) => {
                    tracing::debug!(%operation, merged = count, "remote result merged");
                    this.clear_remote_error();
                    sync.set(SyncState::RemoteApplied);
                }
                Err(err) => {
                    this.report_remote_error(&operation, err);
                    sync.set(SyncState::RemoteFailed);
                }
            }
        });

        stream
    }

    fn first_local<R: Record>(&self, query: &LocalQuery<R>) -> Result<R, DataAccessError> {
        self.store
            .query(query)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StoreError::NotFound {
                    collection: R::COLLECTION.to_string(),
                    id: query.id.clone().unwrap_or_else(|| "*".to_string()),
                }
                .into()
            })
    }

    fn report_remote_error(&self, operation: &RemoteOperation, error: DataAccessError) {
        tracing::warn!(%operation, %error, "remote failure, serving local data");
        self.remote_errors.send_replace(Some(error));
    }

    fn clear_remote_error(&self) {
        self.remote_errors.send_if_modified(|last| last.take().is_some());
    }
}

/// Payload elements: an array's items, a lone object, or nothing for `null`.
fn payload_elements(payload: &Value) -> Result<Vec<&Value>, RemoteFailure> {
    match payload {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(_) => Ok(vec![payload]),
        Value::Null => Ok(Vec::new()),
        other => Err(RemoteFailure::Payload(format!(
            "expected an array or object, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode into a temporary context. Bad elements are dropped; if every element
/// of a non-empty payload is bad the whole call fails.
fn decode_all<R: Record>(store: &LocalStore, payload: &Value) -> Result<Vec<R>, DataAccessError> {
    let elements = payload_elements(payload)?;
    let ctx = store.new_temporary_context();
    let mut records: Vec<R> = Vec::with_capacity(elements.len());
    for element in &elements {
        records.extend(decode_or_drop(store, element, &ctx)?);
    }
    if records.is_empty() && !elements.is_empty() {
        return Err(RemoteFailure::Payload(format!(
            "none of the {} {} elements could be decoded",
            elements.len(),
            R::COLLECTION
        ))
        .into());
    }
    Ok(records)
}

/// Decode into a background context and save it. Returns how many records merged.
fn merge<R: Record>(store: &LocalStore, payload: &Value) -> Result<usize, DataAccessError> {
    let elements = payload_elements(payload)?;
    let ctx = store.new_background_context();
    let mut merged = 0;
    for element in &elements {
        if decode_or_drop::<R>(store, element, &ctx)?.is_some() {
            merged += 1;
        }
    }
    store.save(&ctx)?;
    Ok(merged)
}

/// A decoded and staged record, `None` for an element that does not decode.
/// Staging failures are errors.
fn decode_or_drop<R: Record>(
    store: &LocalStore,
    element: &Value,
    ctx: &crate::store::Context,
) -> Result<Option<R>, DataAccessError> {
    match store.decode::<R>(element, ctx) {
        Ok(record) => Ok(Some(record)),
        Err(DataAccessError::Decode(err)) => {
            tracing::warn!(collection = R::COLLECTION, error = %err, "dropping undecodable payload element");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn decode_one<R: Record>(store: &LocalStore, payload: &Value) -> Result<R, DataAccessError> {
    let element = match payload {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(payload),
        _ => None,
    }
    .ok_or_else(|| RemoteFailure::Payload(format!("no {} element in payload", R::COLLECTION)))?;
    store.decode(element, &store.new_temporary_context())
}

/// Prefer the server's copy of the saved record when it echoes the same id.
fn server_version<R: Record>(record: Option<R>, response: &Value) -> Option<R> {
    let record = record?;
    match R::decode_value(response) {
        Ok(echoed) if echoed.id() == record.id() => Some(echoed),
        _ => Some(record),
    }
}
