//! Single-flight coalescing of concurrent cache misses.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::http::{CacheKey, Response};
use crate::origin::OriginError;
use crate::store::NamespaceHandle;

use super::CacheOutcome;

/// Shared result of one origin fetch.
pub(crate) type FlightResult = Result<(Response, CacheOutcome), Arc<OriginError>>;

pub(crate) type Flight = OnceCell<FlightResult>;

/// A flight is scoped to the namespace it stores into, so a miss after a
/// version bump never joins a fetch bound for the retired namespace.
pub(crate) type FlightKey = (NamespaceHandle, CacheKey);

struct Slot {
    flight: Arc<Flight>,
    waiters: usize,
}

/// In-progress fetches, keyed by namespace and request identity.
///
/// The first miss for a key creates a [`Flight`] and initializes it; later
/// misses for the same key join it and await the same result. If the task
/// initializing a flight is dropped, `OnceCell` hands initialization to one of
/// the waiters, so a cancelled leader never strands its followers. A slot is
/// retired once its result exists or its last waiter is gone.
#[derive(Default)]
pub(crate) struct Flights {
    inner: Mutex<HashMap<FlightKey, Slot>>,
}

impl Flights {
    /// Joins the flight for `key`, creating it if none is in progress.
    pub(crate) fn join(&self, key: FlightKey) -> FlightGuard<'_> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = map.entry(key.clone()).or_insert_with(|| Slot {
            flight: Arc::default(),
            waiters: 0,
        });
        slot.waiters += 1;
        let flight = Arc::clone(&slot.flight);
        FlightGuard {
            flights: self,
            key,
            flight,
        }
    }

    fn leave(&self, key: &FlightKey, flight: &Arc<Flight>) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = map.get_mut(key) else {
            return;
        };
        // A newer flight for the same key is left alone.
        if !Arc::ptr_eq(&slot.flight, flight) {
            return;
        }
        slot.waiters -= 1;
        if slot.waiters == 0 || flight.initialized() {
            map.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn in_progress(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// One caller's membership in a flight. Dropping it, whether after the result
/// arrived or because the caller was cancelled, leaves the flight.
pub(crate) struct FlightGuard<'a> {
    flights: &'a Flights,
    key: FlightKey,
    flight: Arc<Flight>,
}

impl Deref for FlightGuard<'_> {
    type Target = Flight;

    fn deref(&self) -> &Flight {
        &self.flight
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.leave(&self.key, &self.flight);
    }
}
