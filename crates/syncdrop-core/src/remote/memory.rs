//! In-process remote backend.
//!
//! Holds `drops` and `devices` rows behind a lock and pushes a change signal
//! after every mutation. Clones share the same tables, so several engines
//! (one per simulated device) can talk to one "server".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{millis_to_timestamp, ChangeHandler, DeviceRow, DropRow, RemoteStore};
use crate::error::{SyncError, SyncResult};
use crate::types::{sort_newest_first, CollectionId, Drop, DropId};

const FEED_CAPACITY: usize = 256;

/// In-memory stand-in for the relational backend
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

struct Inner {
    rows: RwLock<HashMap<String, DropRow>>,
    devices: RwLock<Vec<DeviceRow>>,
    feed: broadcast::Sender<String>,
    fail_next_insert: AtomicBool,
    insert_requests: AtomicUsize,
    insert_delay: Mutex<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(HashMap::new()),
                devices: RwLock::new(Vec::new()),
                feed,
                fail_next_insert: AtomicBool::new(false),
                insert_requests: AtomicUsize::new(0),
                insert_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Make the next `insert`/`insert_many` fail without writing anything.
    pub fn fail_next_insert(&self) {
        self.inner.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Hold every later `insert`/`insert_many` for `delay` before writing,
    /// like a slow network round trip.
    pub fn delay_inserts(&self, delay: Duration) {
        *self.inner.insert_delay.lock() = delay;
    }

    /// Number of insert requests received, including failed ones
    pub fn insert_requests(&self) -> usize {
        self.inner.insert_requests.load(Ordering::SeqCst)
    }

    /// Raw rows belonging to `owner_id`, unordered
    pub fn rows_for(&self, owner_id: &str) -> Vec<DropRow> {
        self.inner
            .rows
            .read()
            .values()
            .filter(|r| r.user_id.as_deref() == Some(owner_id))
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.inner.rows.read().len()
    }

    pub fn devices_for(&self, owner_id: &str) -> Vec<DeviceRow> {
        self.inner
            .devices
            .read()
            .iter()
            .filter(|d| d.user_id == owner_id)
            .cloned()
            .collect()
    }

    fn publish(&self, owner_id: &str) {
        let _ = self.inner.feed.send(owner_id.to_string());
    }

    fn check_insert(&self) -> SyncResult<()> {
        self.inner.insert_requests.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Remote("insert rejected".to_string()));
        }
        Ok(())
    }

    async fn wait_insert_delay(&self) {
        let delay = *self.inner.insert_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Apply `f` to the owner's row `id`. Missing rows are left alone.
    fn update_row<F>(&self, owner_id: &str, id: &DropId, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut DropRow) -> SyncResult<()>,
    {
        let changed = {
            let mut rows = self.inner.rows.write();
            match rows.get_mut(id.as_str()) {
                Some(row) if row.user_id.as_deref() == Some(owner_id) => {
                    f(row)?;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish(owner_id);
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(
        &self,
        owner_id: &str,
        collection: Option<CollectionId>,
        trashed: bool,
    ) -> SyncResult<Vec<Drop>> {
        let mut drops: Vec<Drop> = self
            .inner
            .rows
            .read()
            .values()
            .filter(|r| r.user_id.as_deref() == Some(owner_id))
            .filter(|r| r.deleted_at.is_some() == trashed)
            .filter(|r| collection.map_or(true, |c| r.collection_id == c))
            .cloned()
            .map(DropRow::into_drop)
            .collect();
        sort_newest_first(&mut drops);
        Ok(drops)
    }

    async fn insert(&self, drop: &Drop, owner_id: &str, device_id: &str) -> SyncResult<()> {
        self.check_insert()?;
        self.wait_insert_delay().await;
        let row = DropRow::from_drop(drop, owner_id, device_id)?;
        self.inner.rows.write().insert(row.id.clone(), row);
        self.publish(owner_id);
        Ok(())
    }

    async fn insert_many(&self, drops: &[Drop], owner_id: &str, device_id: &str) -> SyncResult<()> {
        self.check_insert()?;
        self.wait_insert_delay().await;
        let rows = drops
            .iter()
            .map(|d| DropRow::from_drop(d, owner_id, device_id))
            .collect::<SyncResult<Vec<_>>>()?;
        {
            let mut table = self.inner.rows.write();
            for row in rows {
                table.insert(row.id.clone(), row);
            }
        }
        debug!(count = drops.len(), owner = owner_id, "Bulk inserted rows");
        self.publish(owner_id);
        Ok(())
    }

    async fn soft_delete(&self, owner_id: &str, id: &DropId, deleted_at: i64) -> SyncResult<()> {
        let at = millis_to_timestamp(deleted_at)?;
        self.update_row(owner_id, id, |row| {
            row.deleted_at = Some(at);
            Ok(())
        })
    }

    async fn restore(&self, owner_id: &str, id: &DropId) -> SyncResult<()> {
        self.update_row(owner_id, id, |row| {
            row.deleted_at = None;
            Ok(())
        })
    }

    async fn hard_delete(&self, owner_id: &str, id: &DropId) -> SyncResult<()> {
        let removed = {
            let mut rows = self.inner.rows.write();
            let owned = rows
                .get(id.as_str())
                .is_some_and(|r| r.user_id.as_deref() == Some(owner_id));
            owned && rows.remove(id.as_str()).is_some()
        };
        if removed {
            self.publish(owner_id);
        }
        Ok(())
    }

    async fn move_to(&self, owner_id: &str, id: &DropId, collection: CollectionId) -> SyncResult<()> {
        self.update_row(owner_id, id, |row| {
            row.collection_id = collection;
            Ok(())
        })
    }

    fn watch(&self, owner_id: &str, on_change: ChangeHandler) -> JoinHandle<()> {
        let mut rx = self.inner.feed.subscribe();
        let owner = owner_id.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(changed) if changed == owner => on_change(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => on_change(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn ensure_device(&self, owner_id: &str, device_key: &str, label: &str) -> SyncResult<String> {
        let mut devices = self.inner.devices.write();
        if let Some(existing) = devices
            .iter()
            .find(|d| d.user_id == owner_id && d.device_key == device_key)
        {
            return Ok(existing.id.clone());
        }

        let row = DeviceRow {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: owner_id.to_string(),
            device_key: device_key.to_string(),
            name: label.to_string(),
        };
        debug!(owner = owner_id, device = %row.id, "Registered device");
        let id = row.id.clone();
        devices.push(row);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DropType;
    use std::time::Duration;

    fn drop_in(collection: CollectionId, created_at: i64) -> Drop {
        Drop::new("x", DropType::Text, collection).with_created_at(created_at)
    }

    #[tokio::test]
    async fn test_list_partitions_and_sorts() {
        let remote = MemoryRemote::new();
        let a = drop_in(CollectionId::Inbox, 1);
        let b = drop_in(CollectionId::Links, 2);
        let c = drop_in(CollectionId::Inbox, 3);
        for d in [&a, &b, &c] {
            remote.insert(d, "u1", "dev").await.unwrap();
        }
        remote.soft_delete("u1", &c.id, 10).await.unwrap();

        let active = remote.list("u1", None, false).await.unwrap();
        assert_eq!(active.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec![b.id.clone(), a.id.clone()]);

        let inbox = remote.list("u1", Some(CollectionId::Inbox), false).await.unwrap();
        assert_eq!(inbox.len(), 1);

        let trash = remote.list("u1", None, true).await.unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].deleted_at, Some(10));
    }

    #[tokio::test]
    async fn test_owner_partition_is_enforced() {
        let remote = MemoryRemote::new();
        let d = drop_in(CollectionId::Inbox, 1);
        remote.insert(&d, "alice", "dev").await.unwrap();

        remote.hard_delete("mallory", &d.id).await.unwrap();
        remote.soft_delete("mallory", &d.id, 5).await.unwrap();

        assert!(remote.list("mallory", None, false).await.unwrap().is_empty());
        assert_eq!(remote.list("alice", None, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_bulk_insert_writes_nothing() {
        let remote = MemoryRemote::new();
        remote.fail_next_insert();
        let drops = vec![drop_in(CollectionId::Inbox, 1), drop_in(CollectionId::Inbox, 2)];

        assert!(remote.insert_many(&drops, "u", "dev").await.is_err());
        assert_eq!(remote.row_count(), 0);

        remote.insert_many(&drops, "u", "dev").await.unwrap();
        assert_eq!(remote.row_count(), 2);
        assert_eq!(remote.insert_requests(), 2);
    }

    #[tokio::test]
    async fn test_ensure_device_is_idempotent_per_device_key() {
        let remote = MemoryRemote::new();
        let first = remote.ensure_device("u", "key-a", "Laptop").await.unwrap();
        let again = remote.ensure_device("u", "key-a", "Laptop").await.unwrap();
        let other = remote.ensure_device("u", "key-b", "Phone").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(remote.devices_for("u").len(), 2);
    }

    #[tokio::test]
    async fn test_watch_fires_for_owner_only() {
        let remote = MemoryRemote::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = remote.watch(
            "u1",
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        remote.insert(&drop_in(CollectionId::Inbox, 1), "u2", "dev").await.unwrap();
        remote.insert(&drop_in(CollectionId::Inbox, 2), "u1", "dev").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(rx.try_recv().is_err());
        handle.abort();
    }
}
