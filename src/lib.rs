//! Local-first data access: fetch from a local store, a remote source, or both,
//! reconcile the two, and push every durable change to live query streams.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!  AccessRequest ─▶│          DataAccess          │
//!                  │  fetch / fetch_one / save /  │
//!                  │  delete / remote_errors      │
//!                  └──────┬────────────────┬──────┘
//!                         │                │
//!                         ▼                ▼
//!                ┌────────────────┐  ┌──────────────┐
//!                │   LocalStore   │  │ RemoteClient │
//!                │ contexts, save │  │  (HTTP/JSON) │
//!                │   observers    │  └──────────────┘
//!                └───────┬────────┘
//!                        │ notify inside commit
//!                        ▼
//!                 QueryStream<R>  (live snapshots, cancellable)
//! ```

extern crate self as data_access;

mod access;
pub mod config;
mod error;
pub mod query;
pub mod record;
pub mod remote;
pub mod request;
pub mod rooms;
pub mod store;
pub mod stream;

pub use access::DataAccess;
pub use config::{Config, ConfigError, RemoteConfig, StoreConfig};
pub use error::{DataAccessError, StoreError};
pub use query::{LocalQuery, Predicate, SortKey};
pub use record::{DecodeError, FieldProblem, FieldValue, Record};
#[cfg(feature = "http")]
pub use remote::HttpRemoteClient;
pub use remote::{RemoteClient, RemoteFailure, StaticToken, StatusClass, TokenProvider};
pub use request::{AccessRequest, Method, RemoteOperation, StorageLocation};
pub use store::{
    ChangeSet, CollectionChanges, Context, ContextKind, FilePersistence, InMemoryPersistence,
    LocalStore, ObserverId, Persistence,
};
pub use stream::{Cancellation, QueryStream, StreamItem, Subscription, SyncState};

// Derive macro for `Record`
pub use data_access_macros::Record;
