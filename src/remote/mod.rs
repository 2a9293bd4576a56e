//! Remote client - executes a described HTTP operation.
//!
//! The coordinator only needs [`RemoteClient::execute`]; transport details
//! (TLS, connection pooling, socket-level retries) belong to the implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     execute(op)      ┌──────────────────────┐
//! │      DataAccess      │ ───────────────────▶ │  impl RemoteClient   │
//! │  (fetch/save/delete) │ ◀─────────────────── │  HttpRemoteClient    │
//! └──────────────────────┘  Result<Value, ..>   │  (or a test double)  │
//!                                               └──────────────────────┘
//! ```

#[cfg(feature = "http")]
mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::request::RemoteOperation;

#[cfg(feature = "http")]
pub use http::HttpRemoteClient;

/// Executes remote operations, returning the decoded JSON body.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn execute(&self, operation: &RemoteOperation) -> Result<Value, RemoteFailure>;
}

#[async_trait]
impl<C: RemoteClient + ?Sized> RemoteClient for Arc<C> {
    async fn execute(&self, operation: &RemoteOperation) -> Result<Value, RemoteFailure> {
        (**self).execute(operation).await
    }
}

/// Supplies the bearer token attached to outgoing requests.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Status bands the caller may want to react to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Unauthorized,
    Forbidden,
    NotFound,
    Unprocessable,
    Server,
    Other,
}

impl StatusClass {
    /// Classify a non-2xx status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => StatusClass::Unauthorized,
            403 => StatusClass::Forbidden,
            404 => StatusClass::NotFound,
            422 => StatusClass::Unprocessable,
            500..=599 => StatusClass::Server,
            _ => StatusClass::Other,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            StatusClass::Unauthorized => "unauthorized",
            StatusClass::Forbidden => "forbidden",
            StatusClass::NotFound => "not found",
            StatusClass::Unprocessable => "data could not be processed",
            StatusClass::Server => "internal server error",
            StatusClass::Other => "unexpected status",
        }
    }
}

/// A classified remote failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteFailure {
    /// The request never produced a response.
    #[error("network failure: {0}")]
    Network(String),
    /// A response arrived with a non-2xx status.
    #[error("{} ({status})", .class.describe())]
    Status { status: u16, class: StatusClass },
    /// The response body did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl RemoteFailure {
    pub fn from_status(status: u16) -> Self {
        RemoteFailure::Status {
            status,
            class: StatusClass::from_status(status),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<StatusClass> {
        match self {
            RemoteFailure::Status { class, .. } => Some(*class),
            _ => None,
        }
    }
}
