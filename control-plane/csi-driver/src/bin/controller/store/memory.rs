//! In-memory store used by tests and by the controller when running without
//! a cluster (development mode).

use super::{MetaStore, Page, SnapshotRecord, StoreError, VolumeRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct MemoryStore {
    volumes: Mutex<BTreeMap<String, VolumeRecord>>,
    snapshots: Mutex<BTreeMap<String, SnapshotRecord>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

fn paged<T: Clone>(
    items: impl Iterator<Item = T>,
    starting_token: Option<&str>,
    max_entries: usize,
) -> Result<Page<T>, StoreError> {
    let start = match starting_token {
        Some("") | None => 0,
        Some(token) => token.parse::<usize>().map_err(|_| StoreError::Malformed {
            message: format!("invalid starting token '{token}'"),
        })?,
    };
    let all: Vec<T> = items.collect();
    let entries: Vec<T> = if max_entries == 0 {
        all.iter().skip(start).cloned().collect()
    } else {
        all.iter().skip(start).take(max_entries).cloned().collect()
    };
    let consumed = start + entries.len();
    let next_token = (consumed < all.len()).then(|| consumed.to_string());
    Ok(Page {
        entries,
        next_token,
    })
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn create_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        let mut volumes = self.volumes.lock();
        if volumes.contains_key(&record.volume_id) {
            return Err(StoreError::AlreadyExists {
                kind: "volume",
                id: record.volume_id.clone(),
            });
        }
        volumes.insert(record.volume_id.clone(), record.clone());
        Ok(())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, StoreError> {
        self.volumes
            .lock()
            .get(volume_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "volume",
                id: volume_id.to_string(),
            })
    }

    async fn update_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        let mut volumes = self.volumes.lock();
        if !volumes.contains_key(&record.volume_id) {
            return Err(StoreError::NotFound {
                kind: "volume",
                id: record.volume_id.clone(),
            });
        }
        volumes.insert(record.volume_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), StoreError> {
        match self.volumes.lock().remove(volume_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "volume",
                id: volume_id.to_string(),
            }),
        }
    }

    async fn list_volumes(
        &self,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<VolumeRecord>, StoreError> {
        paged(
            self.volumes.lock().values().cloned().collect::<Vec<_>>().into_iter(),
            starting_token,
            max_entries,
        )
    }

    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.lock();
        if snapshots.contains_key(&record.snapshot_id) {
            return Err(StoreError::AlreadyExists {
                kind: "snapshot",
                id: record.snapshot_id.clone(),
            });
        }
        snapshots.insert(record.snapshot_id.clone(), record.clone());
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
        self.snapshots
            .lock()
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "snapshot",
                id: snapshot_id.to_string(),
            })
    }

    async fn update_snapshot_status(
        &self,
        snapshot_id: &str,
        ready_to_use: bool,
    ) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.lock();
        match snapshots.get_mut(snapshot_id) {
            Some(snapshot) => {
                snapshot.ready_to_use = ready_to_use;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "snapshot",
                id: snapshot_id.to_string(),
            }),
        }
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        match self.snapshots.lock().remove(snapshot_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "snapshot",
                id: snapshot_id.to_string(),
            }),
        }
    }

    async fn list_snapshots(
        &self,
        source_volume_id: Option<&str>,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<SnapshotRecord>, StoreError> {
        let snapshots: Vec<SnapshotRecord> = self
            .snapshots
            .lock()
            .values()
            .filter(|snapshot| {
                source_volume_id
                    .map(|source| snapshot.source_volume_id == source)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        paged(snapshots.into_iter(), starting_token, max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn volume(id: &str) -> VolumeRecord {
        VolumeRecord {
            volume_id: id.to_string(),
            name: id.to_string(),
            svm_name: "k8s-default".to_string(),
            vip: "10.0.0.5".to_string(),
            path: id.to_string(),
            capacity_bytes: 1 << 30,
            created_at: Utc::now(),
            content_source: None,
        }
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let store = MemoryStore::new();
        store.create_volume(&volume("pvc-1")).await.unwrap();
        let error = store.create_volume(&volume("pvc-1")).await.unwrap_err();
        assert!(error.is_already_exists());
    }

    #[tokio::test]
    async fn pagination_honours_tokens() {
        let store = MemoryStore::new();
        for index in 0..5 {
            store.create_volume(&volume(&format!("pvc-{index}"))).await.unwrap();
        }
        let first = store.list_volumes(None, 2).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let token = first.next_token.unwrap();
        let second = store.list_volumes(Some(&token), 2).await.unwrap();
        assert_eq!(second.entries.len(), 2);
        let token = second.next_token.unwrap();
        let last = store.list_volumes(Some(&token), 2).await.unwrap();
        assert_eq!(last.entries.len(), 1);
        assert!(last.next_token.is_none());
    }
}
