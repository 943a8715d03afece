//! Process-local advisory locks keyed by (collection, key).

use super::{id_of, DataStore, Document, FindQuery, RecordId};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per key, created on demand and dropped once nobody holds or waits on it.
#[derive(Clone, Default, Debug)]
pub struct AdvisoryLocks {
    slots: Slots,
}

pub struct LockGuard {
    key: String,
    slots: Slots,
    _held: OwnedMutexGuard<()>,
}

impl AdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, collection: &str, key: &str) -> LockGuard {
        let key = format!("{}:{}", collection, key);
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let held = slot.lock_owned().await;
        LockGuard {
            key,
            slots: self.slots.clone(),
            _held: held,
        }
    }

    /// Keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only owners when no one else is waiting.
        if slots.get(&self.key).map_or(false, |slot| Arc::strong_count(slot) <= 2) {
            slots.remove(&self.key);
        }
    }
}

/// Serializes store calls that reference the same record, or the synthetic `count`/`sum`
/// keys, within this process. Inserts take the `count` key since `_location` derives from it.
pub struct LockedStore<S> {
    inner: S,
    locks: AdvisoryLocks,
}

impl<S: DataStore> LockedStore<S> {
    pub fn new(inner: S) -> Self {
        LockedStore {
            inner,
            locks: AdvisoryLocks::new(),
        }
    }

    pub fn locks(&self) -> &AdvisoryLocks {
        &self.locks
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn guard(&self, collection: &str, key: Option<&str>) -> Option<LockGuard> {
        match key {
            Some(key) => Some(self.locks.acquire(collection, key).await),
            None => None,
        }
    }
}

#[async_trait]
impl<S: DataStore> DataStore for LockedStore<S> {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        let _guard = self.guard(collection, id_of(&query.filter)).await;
        self.inner.find(collection, query).await
    }

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StoreError> {
        let _guard = self.guard(collection, id_of(filter)).await;
        self.inner.find_one(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Option<&Document>) -> Result<u64, StoreError> {
        let _guard = self.locks.acquire(collection, "count").await;
        self.inner.count(collection, filter).await
    }

    async fn sum(&self, collection: &str, filter: &Document, field: &str) -> Result<f64, StoreError> {
        let _guard = self.locks.acquire(collection, "sum").await;
        self.inner.sum(collection, filter, field).await
    }

    async fn save(&self, collection: &str, record: Document) -> Result<Document, StoreError> {
        let key = id_of(&record).unwrap_or("count").to_string();
        let _guard = self.locks.acquire(collection, &key).await;
        self.inner.save(collection, record).await
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<u64, StoreError> {
        let _guard = self.locks.acquire(collection, &id.to_string()).await;
        self.inner.delete(collection, id).await
    }

    async fn update_fields(&self, collection: &str, filter: &Document, patch: &Document) -> Result<u64, StoreError> {
        let _guard = self.guard(collection, id_of(filter)).await;
        self.inner.update_fields(collection, filter, patch).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    fn id_from_str(&self, s: &str) -> Result<RecordId, StoreError> {
        self.inner.id_from_str(s)
    }
}
