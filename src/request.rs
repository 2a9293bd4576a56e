//! Access requests: what to read or write, locally and/or remotely.
//!
//! A request pairs an optional [`LocalQuery`] with an optional
//! [`RemoteOperation`]. At least one must be present.

use std::fmt;
use std::marker::PhantomData;

use serde_json::Value;

use crate::error::DataAccessError;
use crate::query::LocalQuery;
use crate::record::Record;

/// HTTP method of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the query string rather than a body.
    pub fn uses_query_string(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of one remote call: method, path relative to the base URL, parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOperation {
    pub method: Method,
    pub path: String,
    pub parameters: Option<Value>,
}

impl RemoteOperation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            parameters: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn is_delete(&self) -> bool {
        self.method == Method::Delete
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Where a write takes effect.
///
/// - `Both`: the remote call must succeed before the local store is touched.
/// - `RemoteOnly`: only the remote call runs.
/// - `LocalOnly`: the local store is authoritative; a named remote call is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageLocation {
    #[default]
    Both,
    RemoteOnly,
    LocalOnly,
}

impl StorageLocation {
    pub fn writes_local(&self) -> bool {
        !matches!(self, StorageLocation::RemoteOnly)
    }

    pub fn requires_remote(&self) -> bool {
        !matches!(self, StorageLocation::LocalOnly)
    }
}

/// One logical fetch/save/delete operation over records of type `R`.
#[derive(Debug, Clone)]
pub struct AccessRequest<R> {
    pub local: Option<LocalQuery<R>>,
    pub remote: Option<RemoteOperation>,
    pub location: StorageLocation,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Default for AccessRequest<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> AccessRequest<R> {
    /// An empty request. Invalid until a local query or remote operation is added.
    pub fn new() -> Self {
        Self {
            local: None,
            remote: None,
            location: StorageLocation::default(),
            _record: PhantomData,
        }
    }

    pub fn local_only(query: LocalQuery<R>) -> Self {
        Self::new()
            .with_local(query)
            .stored(StorageLocation::LocalOnly)
    }

    pub fn remote_only(operation: RemoteOperation) -> Self {
        Self::new()
            .with_remote(operation)
            .stored(StorageLocation::RemoteOnly)
    }

    pub fn both(query: LocalQuery<R>, operation: RemoteOperation) -> Self {
        Self::new().with_local(query).with_remote(operation)
    }

    pub fn with_local(mut self, query: LocalQuery<R>) -> Self {
        self.local = Some(query);
        self
    }

    pub fn with_remote(mut self, operation: RemoteOperation) -> Self {
        self.remote = Some(operation);
        self
    }

    pub fn stored(mut self, location: StorageLocation) -> Self {
        self.location = location;
        self
    }

    /// The record type tag this request targets.
    pub fn record_type(&self) -> &'static str {
        R::COLLECTION
    }

    /// The record attached to the local query, if any.
    pub fn record(&self) -> Option<&R> {
        self.local.as_ref().and_then(|local| local.record.as_ref())
    }

    /// Reject requests with neither a local query nor a remote operation.
    pub fn validate(&self) -> Result<(), DataAccessError> {
        if self.local.is_none() && self.remote.is_none() {
            return Err(DataAccessError::InvalidRequest {
                record_type: R::COLLECTION,
            });
        }
        Ok(())
    }
}
