//! Namespace lifecycle: which namespace is active, and when old ones go away.
//!
//! The [`LifecycleManager`] moves through `Uninitialized -> Active(v)`. At
//! startup [`LifecycleManager::on_init`] opens the namespace for the deployed
//! version tag and publishes it through the shared [`ActiveNamespace`]. When a
//! new tag is observed the manager opens the new namespace, swaps the pointer
//! in one atomic store, and only then deletes every other namespace under its
//! prefix. There is no rollback: returning to an older tag re-creates its
//! namespace empty.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{CacheStore, NamespaceHandle, StoreError};

/// Errors produced by namespace transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to open namespace `{namespace}`: {source}")]
    Open {
        namespace: String,
        #[source]
        source: StoreError,
    },

    #[error("version tag must not be empty")]
    EmptyVersion,
}

/// A published namespace together with the version tag it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    version: String,
    handle: NamespaceHandle,
}

impl Generation {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn handle(&self) -> &NamespaceHandle {
        &self.handle
    }
}

/// Shared, atomically swappable reference to the active namespace.
///
/// The lifecycle manager writes it; interceptors read it once per request.
/// A reader gets either the previous generation or the next one in full.
#[derive(Debug, Default)]
pub struct ActiveNamespace {
    slot: ArcSwapOption<Generation>,
}

impl ActiveNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current generation, or `None` before initialization.
    pub fn load(&self) -> Option<Arc<Generation>> {
        self.slot.load_full()
    }

    fn publish(&self, generation: Generation) {
        self.slot.store(Some(Arc::new(generation)));
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active { version: String },
}

/// Owns namespace creation and eviction for one cache prefix.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use shelfcache::lifecycle::{LifecycleManager, LifecycleState};
/// use shelfcache::store::{CacheStore, MemoryStore};
///
/// let store = Arc::new(MemoryStore::new());
/// let manager = LifecycleManager::new(store.clone(), "catalog");
///
/// manager.on_init("v1").unwrap();
/// manager.observe_version("v2").unwrap();
///
/// assert_eq!(manager.state(), LifecycleState::Active { version: "v2".into() });
/// assert_eq!(store.namespaces().unwrap(), vec!["catalog-v2".to_string()]);
/// ```
pub struct LifecycleManager {
    store: Arc<dyn CacheStore>,
    prefix: String,
    active: Arc<ActiveNamespace>,
    pending: Mutex<Option<String>>,
    // Serializes transitions; readers never take it.
    transition: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            active: Arc::new(ActiveNamespace::new()),
            pending: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    /// The store this manager publishes namespaces from.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// The shared active-namespace pointer, for handing to interceptors.
    pub fn active(&self) -> Arc<ActiveNamespace> {
        Arc::clone(&self.active)
    }

    /// Returns the namespace name used for `version`.
    pub fn namespace_name(&self, version: &str) -> String {
        format!("{}-{}", self.prefix, version)
    }

    pub fn state(&self) -> LifecycleState {
        match self.active.load() {
            Some(generation) => LifecycleState::Active {
                version: generation.version.clone(),
            },
            None => LifecycleState::Uninitialized,
        }
    }

    /// Returns the version tag whose activation failed and awaits a retry.
    pub fn pending(&self) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Startup entry point: opens and publishes the namespace for `version`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Open`] if the namespace cannot be opened. The version
    /// is then remembered for [`retry_pending`](Self::retry_pending).
    pub fn on_init(&self, version: &str) -> Result<(), LifecycleError> {
        self.observe_version(version).map(|_| ())
    }

    /// Applies a (possibly new) version tag.
    ///
    /// Returns `Ok(false)` if `version` is already active. On failure the prior
    /// namespace stays active and `version` becomes pending.
    pub fn observe_version(&self, version: &str) -> Result<bool, LifecycleError> {
        if version.trim().is_empty() {
            return Err(LifecycleError::EmptyVersion);
        }

        let _guard = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self.active.load();
        if previous.as_ref().is_some_and(|g| g.version == version) {
            return Ok(false);
        }

        let name = self.namespace_name(version);
        let handle = match self.store.open(&name) {
            Ok(handle) => handle,
            Err(source) => {
                warn!(
                    namespace = %name,
                    serving = previous.as_ref().map(|g| g.handle.name()).unwrap_or("<none>"),
                    error = %source,
                    "namespace swap failed; keeping previous namespace"
                );
                *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(version.to_owned());
                return Err(LifecycleError::Open {
                    namespace: name,
                    source,
                });
            }
        };

        self.active.publish(Generation {
            version: version.to_owned(),
            handle,
        });
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        info!(
            namespace = %name,
            previous = previous.as_ref().map(|g| g.version.as_str()).unwrap_or("<none>"),
            "cache namespace active"
        );

        self.evict_except(&name);
        Ok(true)
    }

    /// Retries a failed transition, if one is pending.
    ///
    /// Returns `Ok(true)` if the pending version is now active.
    pub fn retry_pending(&self) -> Result<bool, LifecycleError> {
        match self.pending() {
            Some(version) => self.observe_version(&version),
            None => Ok(false),
        }
    }

    /// Spawns a task that calls [`retry_pending`](Self::retry_pending) every
    /// `period`. Must be called from within a Tokio runtime.
    pub fn spawn_retry(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.retry_pending() {
                    Ok(true) => info!("pending namespace swap applied"),
                    Ok(false) => {}
                    Err(e) => debug!(error = %e, "namespace swap retry failed"),
                }
            }
        })
    }

    // Deletes every namespace under this prefix except `current`. Namespaces
    // owned by anything else sharing the store are left alone. Failures only
    // delay cleanup.
    fn evict_except(&self, current: &str) {
        let owned = format!("{}-", self.prefix);
        let names = match self.store.namespaces() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "could not list namespaces for eviction");
                return;
            }
        };
        for name in names
            .iter()
            .filter(|n| n.starts_with(&owned) && n.as_str() != current)
        {
            match self.store.delete_namespace(name) {
                Ok(_) => info!(namespace = %name, "evicted stale cache namespace"),
                Err(e) => warn!(namespace = %name, error = %e, "failed to evict namespace"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::http::{CacheKey, RequestDescriptor, Response, StatusCode};
    use crate::store::{CacheEntry, MemoryStore};

    /// Memory store whose `open` can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_open: AtomicBool,
    }

    impl CacheStore for FlakyStore {
        fn open(&self, name: &str) -> Result<NamespaceHandle, StoreError> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable {
                    reason: "disk full".into(),
                });
            }
            self.inner.open(name)
        }

        fn get(&self, ns: &NamespaceHandle, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
            self.inner.get(ns, key)
        }

        fn put(&self, ns: &NamespaceHandle, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
            self.inner.put(ns, key, entry)
        }

        fn delete_namespace(&self, name: &str) -> Result<bool, StoreError> {
            self.inner.delete_namespace(name)
        }

        fn namespaces(&self) -> Result<Vec<String>, StoreError> {
            self.inner.namespaces()
        }

        fn len(&self, ns: &NamespaceHandle) -> Result<usize, StoreError> {
            self.inner.len(ns)
        }
    }

    fn seed(store: &dyn CacheStore, ns: &NamespaceHandle) -> CacheKey {
        let key = RequestDescriptor::get("/products").key();
        let response = Response::new(StatusCode::OK).body("[]");
        store
            .put(ns, key.clone(), CacheEntry::capture(key.clone(), &response))
            .unwrap();
        key
    }

    #[test]
    fn starts_uninitialized() {
        let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), "c");
        assert_eq!(manager.state(), LifecycleState::Uninitialized);
        assert!(manager.active().load().is_none());
    }

    #[test]
    fn init_clears_own_leftovers_only() {
        let store = Arc::new(MemoryStore::new());
        store.open("c-v0").unwrap();
        store.open("unrelated").unwrap();

        let manager = LifecycleManager::new(store.clone(), "c");
        manager.on_init("v1").unwrap();

        let generation = manager.active().load().unwrap();
        assert_eq!(generation.version(), "v1");
        assert_eq!(generation.handle().name(), "c-v1");
        assert_eq!(
            store.namespaces().unwrap(),
            vec!["c-v1".to_string(), "unrelated".to_string()]
        );
    }

    #[test]
    fn same_version_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(store.clone(), "c");
        manager.on_init("v1").unwrap();
        let ns = manager.active().load().unwrap().handle().clone();
        let key = seed(store.as_ref(), &ns);

        assert!(!manager.observe_version("v1").unwrap());
        assert!(store.get(&ns, &key).unwrap().is_some());
    }

    #[test]
    fn version_bump_destroys_old_entries() {
        let store = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(store.clone(), "c");
        manager.on_init("v1").unwrap();
        let old = manager.active().load().unwrap().handle().clone();
        let key = seed(store.as_ref(), &old);

        assert!(manager.observe_version("v2").unwrap());
        let new = manager.active().load().unwrap().handle().clone();
        assert!(store.get(&new, &key).unwrap().is_none());
        assert!(store.get(&old, &key).is_err());
    }

    #[test]
    fn rollback_recreates_empty_namespace() {
        let store = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(store.clone(), "c");
        manager.on_init("v1").unwrap();
        let v1 = manager.active().load().unwrap().handle().clone();
        let key = seed(store.as_ref(), &v1);

        manager.observe_version("v2").unwrap();
        manager.observe_version("v1").unwrap();
        let back = manager.active().load().unwrap().handle().clone();
        assert_eq!(back.name(), "c-v1");
        assert!(store.get(&back, &key).unwrap().is_none());
    }

    #[test]
    fn failed_swap_keeps_previous_and_retries() {
        let store = Arc::new(FlakyStore::default());
        let manager = LifecycleManager::new(store.clone(), "c");
        manager.on_init("v1").unwrap();

        store.fail_open.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.observe_version("v2"),
            Err(LifecycleError::Open { .. })
        ));
        assert_eq!(manager.state(), LifecycleState::Active { version: "v1".into() });
        assert_eq!(manager.pending().as_deref(), Some("v2"));
        assert!(manager.retry_pending().is_err());

        store.fail_open.store(false, Ordering::SeqCst);
        assert!(manager.retry_pending().unwrap());
        assert_eq!(manager.state(), LifecycleState::Active { version: "v2".into() });
        assert_eq!(manager.pending(), None);
        assert!(!manager.retry_pending().unwrap());
    }

    #[test]
    fn failed_init_stays_uninitialized() {
        let store = Arc::new(FlakyStore::default());
        store.fail_open.store(true, Ordering::SeqCst);
        let manager = LifecycleManager::new(store, "c");
        assert!(manager.on_init("v1").is_err());
        assert_eq!(manager.state(), LifecycleState::Uninitialized);
        assert_eq!(manager.pending().as_deref(), Some("v1"));
    }

    #[test]
    fn empty_version_rejected() {
        let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), "c");
        assert!(matches!(manager.on_init(" "), Err(LifecycleError::EmptyVersion)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_task_applies_pending_swap() {
        let store = Arc::new(FlakyStore::default());
        store.fail_open.store(true, Ordering::SeqCst);
        let manager = Arc::new(LifecycleManager::new(store.clone(), "c"));
        assert!(manager.on_init("v1").is_err());

        let task = manager.spawn_retry(Duration::from_secs(5));
        store.fail_open.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(manager.state(), LifecycleState::Active { version: "v1".into() });
        task.abort();
    }
}
