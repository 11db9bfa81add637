//! Read-through cache in front of a `MetaStore`. Reads may be served from a
//! bounded LRU with a short TTL; every write invalidates the written key.
//! Cached entries are cloned on the way out so callers can never mutate
//! shared cache state. Lists always go to the backing store and keep its
//! continuation token untouched.

use super::{MetaStore, Page, SnapshotRecord, StoreError, VolumeRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::trace;

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// A minimal LRU with TTL: eviction order is tracked in a deque of keys.
struct LruCache<T> {
    capacity: usize,
    ttl: Duration,
    map: HashMap<String, Entry<T>>,
    order: VecDeque<String>,
}

impl<T: Clone> LruCache<T> {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<T> {
        let fresh = match self.map.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        match fresh {
            Some(value) => {
                self.touch(key);
                Some(value)
            }
            None => {
                self.remove(key);
                None
            }
        }
    }

    fn put(&mut self, key: String, value: T) {
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.map.insert(
            key.clone(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        self.touch(&key);
    }

    fn remove(&mut self, key: &str) {
        self.map.remove(key);
        self.order.retain(|existing| existing != key);
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|existing| existing != key);
        self.order.push_back(key.to_string());
    }
}

/// The caching store wrapper.
pub(crate) struct CachedStore {
    inner: Arc<dyn MetaStore>,
    volumes: Mutex<LruCache<VolumeRecord>>,
    snapshots: Mutex<LruCache<SnapshotRecord>>,
}

impl CachedStore {
    pub(crate) fn new(
        inner: Arc<dyn MetaStore>,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            inner,
            volumes: Mutex::new(LruCache::new(capacity, ttl)),
            snapshots: Mutex::new(LruCache::new(capacity, ttl)),
        }
    }
}

#[async_trait]
impl MetaStore for CachedStore {
    async fn create_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        self.inner.create_volume(record).await?;
        self.volumes.lock().remove(&record.volume_id);
        Ok(())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, StoreError> {
        if let Some(cached) = self.volumes.lock().get(volume_id) {
            trace!(volume_id, "volume cache hit");
            return Ok(cached);
        }
        let record = self.inner.get_volume(volume_id).await?;
        self.volumes
            .lock()
            .put(volume_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        self.inner.update_volume(record).await?;
        self.volumes.lock().remove(&record.volume_id);
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), StoreError> {
        self.inner.delete_volume(volume_id).await?;
        self.volumes.lock().remove(volume_id);
        Ok(())
    }

    async fn list_volumes(
        &self,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<VolumeRecord>, StoreError> {
        self.inner.list_volumes(starting_token, max_entries).await
    }

    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        self.inner.create_snapshot(record).await?;
        self.snapshots.lock().remove(&record.snapshot_id);
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
        if let Some(cached) = self.snapshots.lock().get(snapshot_id) {
            trace!(snapshot_id, "snapshot cache hit");
            return Ok(cached);
        }
        let record = self.inner.get_snapshot(snapshot_id).await?;
        self.snapshots
            .lock()
            .put(snapshot_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_snapshot_status(
        &self,
        snapshot_id: &str,
        ready_to_use: bool,
    ) -> Result<(), StoreError> {
        self.inner
            .update_snapshot_status(snapshot_id, ready_to_use)
            .await?;
        self.snapshots.lock().remove(snapshot_id);
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        self.inner.delete_snapshot(snapshot_id).await?;
        self.snapshots.lock().remove(snapshot_id);
        Ok(())
    }

    async fn list_snapshots(
        &self,
        source_volume_id: Option<&str>,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<SnapshotRecord>, StoreError> {
        self.inner
            .list_snapshots(source_volume_id, starting_token, max_entries)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;
    use chrono::Utc;

    fn volume(id: &str, capacity: u64) -> VolumeRecord {
        VolumeRecord {
            volume_id: id.to_string(),
            name: id.to_string(),
            svm_name: "k8s-default".to_string(),
            vip: "10.0.0.5".to_string(),
            path: id.to_string(),
            capacity_bytes: capacity,
            created_at: Utc::now(),
            content_source: None,
        }
    }

    fn cached(inner: Arc<MemoryStore>) -> CachedStore {
        CachedStore::new(inner, 16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn reads_are_owned_copies() {
        let inner = Arc::new(MemoryStore::new());
        let store = cached(inner);
        store.create_volume(&volume("pvc-1", 1)).await.unwrap();

        let mut first = store.get_volume("pvc-1").await.unwrap();
        first.capacity_bytes = 999;
        // Mutating the returned record must not leak into the cache.
        let second = store.get_volume("pvc-1").await.unwrap();
        assert_eq!(second.capacity_bytes, 1);
    }

    #[tokio::test]
    async fn writes_invalidate_the_key() {
        let inner = Arc::new(MemoryStore::new());
        let store = cached(inner);
        store.create_volume(&volume("pvc-1", 1)).await.unwrap();
        // Warm the cache.
        store.get_volume("pvc-1").await.unwrap();

        let mut updated = volume("pvc-1", 42);
        updated.created_at = Utc::now();
        store.update_volume(&updated).await.unwrap();
        assert_eq!(store.get_volume("pvc-1").await.unwrap().capacity_bytes, 42);
    }

    #[tokio::test]
    async fn expired_entries_fall_through() {
        let inner = Arc::new(MemoryStore::new());
        let store = CachedStore::new(inner.clone(), 16, Duration::from_millis(0));
        store.create_volume(&volume("pvc-1", 1)).await.unwrap();
        store.get_volume("pvc-1").await.unwrap();
        // TTL zero: the next read must consult the backing store again, and
        // notices an out-of-band update.
        inner.update_volume(&volume("pvc-1", 7)).await.unwrap();
        assert_eq!(store.get_volume("pvc-1").await.unwrap().capacity_bytes, 7);
    }

    #[tokio::test]
    async fn capacity_bounds_the_cache() {
        let inner = Arc::new(MemoryStore::new());
        let store = CachedStore::new(inner, 2, Duration::from_secs(60));
        for index in 0..3 {
            let record = volume(&format!("pvc-{index}"), index);
            store.create_volume(&record).await.unwrap();
            store.get_volume(&record.volume_id).await.unwrap();
        }
        assert!(store.volumes.lock().map.len() <= 2);
    }
}
