use super::{StoreBackend, StoreError};
use elset_types::prelude::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Process-local backend; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    current: HashMap<CatalogId, ElementSet>,
    history: Vec<ElementSetHistory>,
}

impl MemoryBackend {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreBackend for MemoryBackend {
    fn get(&self, object_id: CatalogId) -> Result<Option<ElementSet>, StoreError> {
        Ok(self.lock().current.get(&object_id).cloned())
    }

    fn upsert(&self, set: &ElementSet) -> Result<(), StoreError> {
        self.lock().current.insert(set.object_id, set.clone());
        Ok(())
    }

    fn append_history(&self, entry: &ElementSetHistory) -> Result<(), StoreError> {
        self.lock().history.push(entry.clone());
        Ok(())
    }

    fn history(&self, object_id: CatalogId) -> Result<Vec<ElementSetHistory>, StoreError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|h| h.object_id == object_id)
            .cloned()
            .collect())
    }

    fn list(&self) -> Result<Vec<ElementSet>, StoreError> {
        Ok(self.lock().current.values().cloned().collect())
    }
}
