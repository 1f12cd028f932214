//! Namespaced store of captured responses.
//!
//! A [`CacheStore`] holds any number of named namespaces, each a map from
//! [`CacheKey`] to an immutable [`CacheEntry`]. Namespaces are the unit of bulk
//! invalidation: entries are overwritten individually but only ever destroyed
//! together with their namespace.
//!
//! ## Core types
//!
//! - [`CacheStore`]: the backend trait (`open`, `get`, `put`, `delete_namespace`).
//! - [`NamespaceHandle`]: a cheap, cloneable reference to an opened namespace.
//! - [`CacheEntry`]: a stored response.
//! - [`MemoryStore`]: the in-process backend.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

use crate::http::{CacheKey, Headers, Response, StatusCode};

mod memory;

pub use memory::MemoryStore;

/// Errors produced by a cache backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("namespace `{name}` does not exist")]
    UnknownNamespace { name: String },

    #[error("invalid namespace name `{name}`")]
    InvalidName { name: String },

    #[error("cache backend unavailable: {reason}")]
    Unavailable { reason: String },
}

/// A reference to an opened namespace.
///
/// Handles carry only the namespace name; every operation resolves it against
/// the store, so a handle to a deleted namespace fails with
/// [`StoreError::UnknownNamespace`] instead of reaching stale data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceHandle {
    name: Arc<str>,
}

impl NamespaceHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A captured response. Immutable once stored; an update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: CacheKey,
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    stored_at: SystemTime,
}

impl CacheEntry {
    /// Captures `response` under `key`, stamped with the current time.
    pub fn capture(key: CacheKey, response: &Response) -> Self {
        Self {
            key,
            status: response.status(),
            headers: response.headers().clone(),
            body: response.body_bytes().clone(),
            stored_at: SystemTime::now(),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn stored_at(&self) -> SystemTime {
        self.stored_at
    }

    /// Rebuilds the response exactly as it was captured.
    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.clone())
    }
}

/// A namespaced key/value store of captured responses.
///
/// # Contract
///
/// - `get` never performs network I/O and returns immediately.
/// - `put` is overwrite-or-insert. Concurrent writers for one key leave exactly
///   one of the written entries, and a concurrent `get` sees the old entry or
///   the new one, never a mix.
/// - `delete_namespace` removes a namespace and all its entries in one step;
///   no caller observes a partially deleted namespace.
pub trait CacheStore: Send + Sync {
    /// Opens `name`, creating it if needed. Idempotent.
    fn open(&self, name: &str) -> Result<NamespaceHandle, StoreError>;

    /// Looks up `key`. `Ok(None)` is a miss.
    fn get(
        &self,
        ns: &NamespaceHandle,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Inserts or overwrites the entry for `key`.
    fn put(
        &self,
        ns: &NamespaceHandle,
        key: CacheKey,
        entry: CacheEntry,
    ) -> Result<(), StoreError>;

    /// Removes `name` and every entry in it. Returns `false` if it did not exist.
    fn delete_namespace(&self, name: &str) -> Result<bool, StoreError>;

    /// Lists the names of all existing namespaces.
    fn namespaces(&self) -> Result<Vec<String>, StoreError>;

    /// Returns the number of entries in a namespace.
    fn len(&self, ns: &NamespaceHandle) -> Result<usize, StoreError>;
}
