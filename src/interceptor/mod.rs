//! The interceptor: cache-first request handling with offline fallback.
//!
//! Every outbound request goes through [`Interceptor::on_intercept`]:
//!
//! 1. Classify the request with the [`PolicyMatcher`].
//! 2. Pass-through requests go straight to the origin; the cache is never
//!    read or written for them.
//! 3. Cacheable requests are answered from the active namespace when an entry
//!    exists. There is no per-entry expiry; staleness is handled by swapping
//!    namespaces.
//! 4. On a miss the request is forwarded (concurrent misses for one key share
//!    a single origin call), a successful response is stored, and the
//!    original is returned. A storage failure is logged and never withholds
//!    the response.
//! 5. If the origin cannot be reached the store is consulted once more, and
//!    failing that a synthetic offline response is returned.
//!
//! No failure in here is surfaced to the caller as an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::{CacheKey, RequestDescriptor, Response, StatusCode};
use crate::lifecycle::{ActiveNamespace, LifecycleManager};
use crate::origin::{Origin, OriginError};
use crate::policy::{Decision, PolicyMatcher};
use crate::store::{CacheEntry, CacheStore, NamespaceHandle};

mod flight;

use flight::{FlightResult, Flights};

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the active namespace without contacting the origin.
    Hit,
    /// Fetched from the origin and stored.
    Miss,
    /// Not cacheable; relayed from the origin.
    Bypass,
    /// The origin failed; served from an existing cache entry.
    Stale,
    /// The origin failed and nothing was cached; synthetic response.
    Offline,
    /// Cacheable, fetched from the origin, but not stored (non-2xx status,
    /// storage failure, or no active namespace).
    Uncached,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
            Self::Stale => "stale",
            Self::Offline => "offline",
            Self::Uncached => "uncached",
        }
    }
}

/// The degraded response returned when the origin is unreachable.
///
/// The defaults (`503`, body `Offline`, `X-Cache-Fallback: offline`) let a
/// caller tell degraded mode apart from a genuine plain-text origin reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    pub status: u16,
    pub body: String,
    pub content_type: String,
    /// Marker header as `(name, value)`; `None` omits it.
    pub marker: Option<(String, String)>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            body: "Offline".to_owned(),
            content_type: "text/plain; charset=utf-8".to_owned(),
            marker: Some(("X-Cache-Fallback".to_owned(), "offline".to_owned())),
        }
    }
}

impl OfflineConfig {
    /// Builds the synthetic offline response.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(StatusCode::from_u16(self.status))
            .header("Content-Type", self.content_type.as_str())
            .body(self.body.clone());
        if let Some((name, value)) = &self.marker {
            response.add_header(name.as_str(), value.as_str());
        }
        response
    }
}

/// Cache-aside request interceptor.
///
/// Holds no mutable state of its own beyond the in-flight table; the cache
/// lives in the [`CacheStore`] and the namespace to use is read from the
/// shared [`ActiveNamespace`] once per request.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use shelfcache::http::{RequestDescriptor, Response, StatusCode};
/// use shelfcache::interceptor::{CacheOutcome, Interceptor};
/// use shelfcache::lifecycle::LifecycleManager;
/// use shelfcache::origin::OriginError;
/// use shelfcache::policy::PolicyMatcher;
/// use shelfcache::store::MemoryStore;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), "catalog");
/// manager.on_init("v1").unwrap();
///
/// let origin = |_req: RequestDescriptor| async {
///     Ok::<_, OriginError>(Response::new(StatusCode::OK).body("[]"))
/// };
/// let interceptor = Interceptor::from_lifecycle(&manager, PolicyMatcher::default(), origin);
///
/// let (_, first) = interceptor.intercept_traced(RequestDescriptor::get("/products")).await;
/// let (_, second) = interceptor.intercept_traced(RequestDescriptor::get("/products")).await;
/// assert_eq!((first, second), (CacheOutcome::Miss, CacheOutcome::Hit));
/// # });
/// ```
pub struct Interceptor {
    matcher: PolicyMatcher,
    store: Arc<dyn CacheStore>,
    active: Arc<ActiveNamespace>,
    origin: Arc<dyn Origin>,
    offline: OfflineConfig,
    origin_timeout: Option<Duration>,
    flights: Flights,
}

impl Interceptor {
    pub fn new(
        matcher: PolicyMatcher,
        store: Arc<dyn CacheStore>,
        active: Arc<ActiveNamespace>,
        origin: impl Origin,
    ) -> Self {
        Self {
            matcher,
            store,
            active,
            origin: Arc::new(origin),
            offline: OfflineConfig::default(),
            origin_timeout: None,
            flights: Flights::default(),
        }
    }

    /// Builds an interceptor reading the store and active namespace owned by `manager`.
    pub fn from_lifecycle(
        manager: &LifecycleManager,
        matcher: PolicyMatcher,
        origin: impl Origin,
    ) -> Self {
        Self::new(matcher, Arc::clone(manager.store()), manager.active(), origin)
    }

    /// Bounds every origin call. On expiry the call counts as a network failure.
    #[must_use]
    pub fn with_origin_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.origin_timeout = timeout;
        self
    }

    /// Replaces the offline fallback response.
    #[must_use]
    pub fn with_offline(mut self, offline: OfflineConfig) -> Self {
        self.offline = offline;
        self
    }

    /// Handles one request. Never fails: the worst case is the offline response.
    ///
    /// Dropping the returned future abandons any in-flight origin call.
    pub async fn on_intercept(&self, request: RequestDescriptor) -> Response {
        self.intercept_traced(request).await.0
    }

    /// Like [`on_intercept`](Self::on_intercept), but stops as soon as
    /// `cancel` fires. Returns `None` if cancelled.
    pub async fn intercept_until(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Option<Response> {
        let key = request.key();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(key = %key, "request cancelled; origin call abandoned");
                None
            }
            response = self.on_intercept(request) => Some(response),
        }
    }

    /// Handles one request and reports how the response was produced.
    pub async fn intercept_traced(&self, request: RequestDescriptor) -> (Response, CacheOutcome) {
        let key = request.key();
        let (response, outcome) = match self.matcher.classify(&request) {
            Decision::PassThrough => self.pass_through(request).await,
            Decision::Cacheable => self.cache_first(request, &key).await,
        };
        debug!(
            key = %key,
            outcome = outcome.as_str(),
            status = response.status().as_u16(),
            "request intercepted"
        );
        (response, outcome)
    }

    async fn pass_through(&self, request: RequestDescriptor) -> (Response, CacheOutcome) {
        match self.forward(request).await {
            Ok(response) => (response, CacheOutcome::Bypass),
            Err(e) => {
                warn!(error = %e, "origin unreachable for pass-through request");
                (self.offline.to_response(), CacheOutcome::Offline)
            }
        }
    }

    async fn cache_first(
        &self,
        request: RequestDescriptor,
        key: &CacheKey,
    ) -> (Response, CacheOutcome) {
        let Some(generation) = self.active.load() else {
            debug!(key = %key, "no active namespace; forwarding uncached");
            return match self.forward(request).await {
                Ok(response) => (response, CacheOutcome::Uncached),
                Err(e) => {
                    warn!(key = %key, error = %e, "origin unreachable");
                    (self.offline.to_response(), CacheOutcome::Offline)
                }
            };
        };
        let ns = generation.handle();

        if let Some(entry) = self.lookup(ns, key) {
            return (entry.to_response(), CacheOutcome::Hit);
        }

        let flight = self.flights.join((ns.clone(), key.clone()));
        let result = flight
            .get_or_init(|| self.fetch_and_store(request, ns, key))
            .await
            .clone();
        drop(flight);

        match result {
            Ok(fetched) => fetched,
            Err(e) => match self.lookup(ns, key) {
                Some(entry) => {
                    warn!(key = %key, error = %e, "origin unreachable; serving cached entry");
                    (entry.to_response(), CacheOutcome::Stale)
                }
                None => {
                    warn!(key = %key, error = %e, "origin unreachable; serving offline response");
                    (self.offline.to_response(), CacheOutcome::Offline)
                }
            },
        }
    }

    // Runs once per flight.
    async fn fetch_and_store(
        &self,
        request: RequestDescriptor,
        ns: &NamespaceHandle,
        key: &CacheKey,
    ) -> FlightResult {
        // A flight that finished just before this one started may have stored it.
        if let Some(entry) = self.lookup(ns, key) {
            return Ok((entry.to_response(), CacheOutcome::Hit));
        }

        let response = self.forward(request).await.map_err(Arc::new)?;
        if !response.status().is_success() {
            debug!(
                key = %key,
                status = response.status().as_u16(),
                "not caching non-success response"
            );
            return Ok((response, CacheOutcome::Uncached));
        }

        let entry = CacheEntry::capture(key.clone(), &response);
        match self.store.put(ns, key.clone(), entry) {
            Ok(()) => {
                debug!(key = %key, namespace = %ns, "response cached");
                Ok((response, CacheOutcome::Miss))
            }
            Err(e) => {
                warn!(key = %key, namespace = %ns, error = %e, "failed to cache response");
                Ok((response, CacheOutcome::Uncached))
            }
        }
    }

    // Store read failures count as misses.
    fn lookup(&self, ns: &NamespaceHandle, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(ns, key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, namespace = %ns, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn forward(&self, request: RequestDescriptor) -> Result<Response, OriginError> {
        let call = self.origin.forward(request);
        match self.origin_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| OriginError::Timeout(limit))?,
            None => call.await,
        }
    }
}
