//! In-process [`CacheStore`] backend.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use super::{CacheEntry, CacheStore, NamespaceHandle, StoreError};
use crate::http::CacheKey;

type Namespace = RwLock<HashMap<CacheKey, Arc<CacheEntry>>>;

/// In-memory namespaced store.
///
/// The namespace table and each namespace's entry map sit behind their own
/// `RwLock`. Entries are held as `Arc<CacheEntry>`: a `put` swaps one pointer
/// under the write lock, so readers only ever see complete entries. Locks are
/// never held across an `.await`; every operation here is synchronous.
///
/// # Examples
///
/// ```
/// use shelfcache::http::{RequestDescriptor, Response, StatusCode};
/// use shelfcache::store::{CacheEntry, CacheStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// let ns = store.open("catalog-v1").unwrap();
/// let key = RequestDescriptor::get("/products").key();
/// let entry = CacheEntry::capture(key.clone(), &Response::new(StatusCode::OK).body("[]"));
///
/// store.put(&ns, key.clone(), entry).unwrap();
/// assert!(store.get(&ns, &key).unwrap().is_some());
///
/// assert!(store.delete_namespace("catalog-v1").unwrap());
/// assert!(store.get(&ns, &key).is_err());
/// ```
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, ns: &NamespaceHandle) -> Result<Arc<Namespace>, StoreError> {
        let table = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        table
            .get(ns.name())
            .cloned()
            .ok_or_else(|| StoreError::UnknownNamespace {
                name: ns.name().to_owned(),
            })
    }
}

impl CacheStore for MemoryStore {
    fn open(&self, name: &str) -> Result<NamespaceHandle, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidName {
                name: name.to_owned(),
            });
        }
        let mut table = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !table.contains_key(name) {
            debug!(namespace = name, "creating cache namespace");
            table.insert(name.to_owned(), Arc::default());
        }
        Ok(NamespaceHandle::new(name))
    }

    fn get(
        &self,
        ns: &NamespaceHandle,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let namespace = self.resolve(ns)?;
        let entries = namespace.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).map(|entry| CacheEntry::clone(entry)))
    }

    fn put(
        &self,
        ns: &NamespaceHandle,
        key: CacheKey,
        entry: CacheEntry,
    ) -> Result<(), StoreError> {
        let namespace = self.resolve(ns)?;
        let mut entries = namespace.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Arc::new(entry));
        Ok(())
    }

    fn delete_namespace(&self, name: &str) -> Result<bool, StoreError> {
        let mut table = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(table.remove(name).is_some())
    }

    fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        let table = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = table.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn len(&self, ns: &NamespaceHandle) -> Result<usize, StoreError> {
        let namespace = self.resolve(ns)?;
        let entries = namespace.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.len())
    }
}
