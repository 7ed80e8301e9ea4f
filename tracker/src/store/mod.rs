//! Durable keyed storage of the latest element set per object, plus the
//! append-only fetch history

use crate::{clock::Clock, error::Error, propagator::epoch_of};
use elset_types::prelude::*;
use std::sync::Arc;
use tracing::debug;

pub use file::FileBackend;
pub use memory::MemoryBackend;

mod file;
mod memory;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("Store worker task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        use std::error::Error as _;
        match e.source() {
            Some(cause) => Error::StorageFailure(format!("{e}: {cause}")),
            None => Error::StorageFailure(e.to_string()),
        }
    }
}

/// Blocking persistence operations behind the store
pub trait StoreBackend: Send + Sync + 'static {
    fn get(&self, object_id: CatalogId) -> Result<Option<ElementSet>, StoreError>;

    /// Create or overwrite the current row for `set.object_id`
    fn upsert(&self, set: &ElementSet) -> Result<(), StoreError>;

    fn append_history(&self, entry: &ElementSetHistory) -> Result<(), StoreError>;

    /// Oldest first
    fn history(&self, object_id: CatalogId) -> Result<Vec<ElementSetHistory>, StoreError>;

    fn list(&self) -> Result<Vec<ElementSet>, StoreError>;
}

/// Cheap to clone; all clones share the backend
#[derive(Clone)]
pub struct EphemerisStore {
    backend: Arc<dyn StoreBackend>,
    clock: Arc<dyn Clock>,
}

impl EphemerisStore {
    pub fn new(backend: Arc<dyn StoreBackend>, clock: Arc<dyn Clock>) -> Self {
        EphemerisStore { backend, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn get(&self, object_id: CatalogId) -> Result<Option<ElementSet>, Error> {
        self.blocking(move |b| b.get(object_id)).await
    }

    /// Store a freshly fetched element set as the current row for
    /// `object_id` and log it to the history.
    ///
    /// Nothing is written when the epoch cannot be derived from `line1`.
    /// The history entry goes first, so a failed write never leaves a
    /// current row without its history.
    pub async fn put(
        &self,
        object_id: CatalogId,
        display_name: Option<String>,
        line1: String,
        line2: String,
    ) -> Result<ElementSet, Error> {
        let epoch = epoch_of(&line1)?;
        let now = self.clock.now();
        let set = ElementSet {
            object_id,
            display_name,
            line1,
            line2,
            epoch,
            fetched_at: now,
            updated_at: now,
            source: Source::Fetched,
        };
        let row = set.clone();
        self.blocking(move |b| {
            b.append_history(&row.history_entry())?;
            b.upsert(&row)
        })
        .await?;
        debug!(object_id, epoch = %set.epoch, "Stored element set");
        Ok(set)
    }

    pub async fn put_raw(&self, object_id: CatalogId, raw: RawElementSet) -> Result<ElementSet, Error> {
        self.put(object_id, raw.display_name, raw.line1, raw.line2)
            .await
    }

    pub async fn history(&self, object_id: CatalogId) -> Result<Vec<ElementSetHistory>, Error> {
        self.blocking(move |b| b.history(object_id)).await
    }

    /// Most recently updated first
    pub async fn list(&self) -> Result<Vec<ElementSet>, Error> {
        let mut sets = self.blocking(|b| b.list()).await?;
        sets.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(a.object_id.cmp(&b.object_id))
        });
        Ok(sets)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StoreBackend) -> Result<T, StoreError> + Send + 'static,
    {
        let backend = self.backend.clone();
        let res = tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(StoreError::from)?;
        Ok(res?)
    }
}
