//! Decides, per request, whether the stored element set is good enough or a
//! fetch is needed, and makes sure only one fetch per object is in flight.

use crate::{error::Error, source::SourceAdapter, store::EphemerisStore};
use chrono::TimeDelta;
use elset_types::prelude::*;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

type InFlight = Shared<BoxFuture<'static, Result<ElementSet, Error>>>;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
enum FetchMode {
    /// Fall back to the stored value when the fetch fails
    Resolve,
    /// Surface the fetch failure
    Refresh,
}

type Registry = Arc<Mutex<HashMap<(CatalogId, FetchMode), InFlight>>>;

#[derive(Clone)]
pub struct FreshnessCoordinator {
    store: EphemerisStore,
    source: Arc<dyn SourceAdapter>,
    fetch_timeout: Duration,
    in_flight: Registry,
}

impl FreshnessCoordinator {
    pub fn new(
        store: EphemerisStore,
        source: Arc<dyn SourceAdapter>,
        fetch_timeout: Duration,
    ) -> Self {
        FreshnessCoordinator {
            store,
            source,
            fetch_timeout,
            in_flight: Default::default(),
        }
    }

    pub fn store(&self) -> &EphemerisStore {
        &self.store
    }

    /// The element set to use for `object_id` right now.
    ///
    /// A stored value fetched at most `max_age_hours` ago is returned as
    /// is. Otherwise, with `allow_fetch`, the provider is asked (joining any
    /// fetch already in flight) and a failed fetch falls back to the stored
    /// value marked `store-stale`. Without `allow_fetch` the provider is
    /// never contacted.
    pub async fn resolve(
        &self,
        object_id: CatalogId,
        max_age_hours: u32,
        allow_fetch: bool,
    ) -> Result<ElementSet, Error> {
        let stored = self.store.get(object_id).await?;
        match stored {
            Some(set) => {
                let age = self.store.clock().now() - set.fetched_at;
                if age <= TimeDelta::hours(i64::from(max_age_hours)) {
                    return Ok(set.with_source(Source::Store));
                }
                if !allow_fetch {
                    debug!(object_id, age_sec = age.num_seconds(), "Serving stale element set");
                    return Ok(set.with_source(Source::StoreStale));
                }
            }
            None if !allow_fetch => return Err(Error::NotFoundInStore(object_id)),
            None => (),
        }
        self.in_flight(object_id, FetchMode::Resolve).await
    }

    /// Fetch regardless of age; failures are not masked by the stored value
    pub async fn refresh(&self, object_id: CatalogId) -> Result<ElementSet, Error> {
        self.in_flight(object_id, FetchMode::Refresh).await
    }

    /// Catalog text for a provider group, under the same fetch timeout.
    /// Nothing is stored here.
    pub async fn fetch_group(&self, group: &str) -> Result<String, Error> {
        tokio::time::timeout(self.fetch_timeout, self.source.fetch_group(group))
            .await
            .map_err(|_| Error::GroupUnavailable {
                group: group.to_owned(),
                reason: format!(
                    "no answer within {}",
                    humantime::format_duration(self.fetch_timeout)
                ),
            })?
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn in_flight(&self, object_id: CatalogId, mode: FetchMode) -> InFlight {
        let key = (object_id, mode);
        let mut registry = lock(&self.in_flight);
        if let Some(fut) = registry.get(&key) {
            debug!(object_id, ?mode, "Joining in-flight fetch");
            return fut.clone();
        }

        // The fetch runs as its own task so it completes, and is stored,
        // even if every caller waiting on it goes away
        let task = tokio::spawn(fetch_and_store(
            self.store.clone(),
            self.source.clone(),
            self.fetch_timeout,
            self.in_flight.clone(),
            object_id,
            mode,
        ));
        let fut = async move {
            task.await.unwrap_or_else(|e| {
                Err(Error::SourceUnavailable {
                    object_id,
                    reason: format!("fetch task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared();
        registry.insert(key, fut.clone());
        fut
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn fetch_and_store(
    store: EphemerisStore,
    source: Arc<dyn SourceAdapter>,
    fetch_timeout: Duration,
    registry: Registry,
    object_id: CatalogId,
    mode: FetchMode,
) -> Result<ElementSet, Error> {
    let outcome = match fetch_once(&store, source.as_ref(), fetch_timeout, object_id).await {
        Err(e) if mode == FetchMode::Resolve && e.is_fetch_failure() => {
            match store.get(object_id).await {
                Ok(Some(set)) => {
                    warn!(object_id, error = %e, "Fetch failed, serving stored element set");
                    Ok(set.with_source(Source::StoreStale))
                }
                Ok(None) => Err(e),
                Err(store_err) => {
                    warn!(
                        object_id,
                        error = %e,
                        store_error = %store_err,
                        "Fetch failed and the stored element set could not be read"
                    );
                    Err(e)
                }
            }
        }
        other => other,
    };
    lock(&registry).remove(&(object_id, mode));
    outcome
}

async fn fetch_once(
    store: &EphemerisStore,
    source: &dyn SourceAdapter,
    fetch_timeout: Duration,
    object_id: CatalogId,
) -> Result<ElementSet, Error> {
    let raw = tokio::time::timeout(fetch_timeout, source.fetch_raw(object_id))
        .await
        .map_err(|_| Error::SourceUnavailable {
            object_id,
            reason: format!(
                "no answer within {}",
                humantime::format_duration(fetch_timeout)
            ),
        })??;
    let set = store.put_raw(object_id, raw).await?;
    info!(object_id, epoch = %set.epoch, name = %set.name(), "Fetched element set");
    Ok(set)
}
