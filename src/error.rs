use std::path::PathBuf;

use crate::record::DecodeError;
use crate::remote::RemoteFailure;

/// Errors raised by the local store and its persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("record not found: {collection}:{id}")]
    NotFound { collection: String, id: String },
    #[error("record serialization error: {0}")]
    Serde(String),
    #[error("persistence error at {}: {message}", .path.display())]
    Persistence { path: PathBuf, message: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

/// Errors surfaced by the data access coordinator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataAccessError {
    /// The request carried neither a local query nor a remote operation.
    #[error("invalid {record_type} request: no local query and no remote operation")]
    InvalidRequest { record_type: &'static str },
    #[error("remote error: {0}")]
    Remote(#[from] RemoteFailure),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// A remote fetch was requested outside a Tokio runtime.
    #[error("remote fetch requires a running Tokio runtime")]
    NoRuntime,
}

impl DataAccessError {
    /// The HTTP status behind a remote error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DataAccessError::Remote(failure) => failure.status(),
            _ => None,
        }
    }
}
