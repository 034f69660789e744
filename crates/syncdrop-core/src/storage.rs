//! Persistent on-device storage using redb.
//!
//! This module holds the guest/offline copy of every drop, plus the scalar
//! values that belong to the device rather than to an account:
//! - Drops (one JSON record per id)
//! - Device id
//! - Guest flag
//!
//! Every open tab of the app shares one [`LocalStore`]; redb gives per-record
//! atomicity, which is all the two mutation paths rely on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::types::{Drop, DropId};

mod settings;

use settings::{DEVICE_TABLE, FLAGS_TABLE};

const DROPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("drops");

/// Local durable store backed by redb
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<RwLock<Database>>,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    ///
    /// This will:
    /// - Create the parent directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DROPS_TABLE)?;
            let _ = write_txn.open_table(DEVICE_TABLE)?;
            let _ = write_txn.open_table(FLAGS_TABLE)?;
        }
        write_txn.commit()?;

        debug!(?path, "Opened local store");
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    pub(crate) fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Drop Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Load a single drop by id.
    ///
    /// Returns `None` if no drop with the given id exists.
    pub fn get(&self, id: &DropId) -> SyncResult<Option<Drop>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DROPS_TABLE)?;

        match table.get(id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Insert a drop, or overwrite the stored drop with the same id.
    pub fn put(&self, drop: &Drop) -> SyncResult<()> {
        let data = serde_json::to_vec(drop)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(DROPS_TABLE)?;
            table.insert(drop.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Physically remove a drop.
    ///
    /// Returns `true` if the drop existed.
    pub fn delete(&self, id: &DropId) -> SyncResult<bool> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(DROPS_TABLE)?;
            let removed = table.remove(id.as_str())?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Load every stored drop, in no particular order.
    ///
    /// Records that fail to decode are skipped with a warning rather than
    /// hiding every other drop.
    pub fn get_all(&self) -> SyncResult<Vec<Drop>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DROPS_TABLE)?;

        let mut drops = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_slice::<Drop>(value.value()) {
                Ok(drop) => drops.push(drop),
                Err(e) => warn!(drop_id = key.value(), error = %e, "Skipping undecodable drop"),
            }
        }
        Ok(drops)
    }

    /// Remove `drops` in one transaction, skipping any whose stored record no
    /// longer equals the given one. Returns how many were removed.
    pub fn delete_unchanged(&self, drops: &[Drop]) -> SyncResult<usize> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(DROPS_TABLE)?;
            let mut removed = 0;
            for drop in drops {
                let unchanged = match table.get(drop.id.as_str())? {
                    Some(v) => serde_json::from_slice::<Drop>(v.value())
                        .is_ok_and(|stored| stored == *drop),
                    None => false,
                };
                if unchanged {
                    table.remove(drop.id.as_str())?;
                    removed += 1;
                }
            }
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Number of stored drops
    pub fn len(&self) -> SyncResult<usize> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DROPS_TABLE)?;
        Ok(table.len()? as usize)
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// A [`LocalStore`] that is opened on first use.
///
/// Concurrent callers racing the first open all wait for the same attempt
/// and receive the same handle. A failed open is remembered: the local path
/// stays unavailable for the rest of the session.
pub struct LazyLocalStore {
    path: PathBuf,
    cell: OnceCell<Result<LocalStore, String>>,
}

impl LazyLocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Wrap an already opened store
    pub fn ready(store: LocalStore) -> Self {
        Self {
            path: PathBuf::new(),
            cell: OnceCell::new_with(Some(Ok(store))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the store, opening it if this is the first call.
    pub async fn get(&self) -> SyncResult<&LocalStore> {
        let opened = self
            .cell
            .get_or_init(|| async {
                let path = self.path.clone();
                let result = tokio::task::spawn_blocking(move || LocalStore::open(&path))
                    .await
                    .map_err(|e| SyncError::Storage(e.to_string()))
                    .and_then(|r| r);
                result.map_err(|e| {
                    warn!(path = ?self.path, error = %e, "Local store failed to open");
                    e.to_string()
                })
            })
            .await;

        opened
            .as_ref()
            .map_err(|msg| SyncError::LocalUnavailable(msg.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, DropType};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path().join("test.redb")).unwrap();
        (store, temp_dir)
    }

    fn text_drop(content: &str) -> Drop {
        Drop::new(content, DropType::Text, CollectionId::Inbox)
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        assert!(LocalStore::open(&db_path).is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_test_store();
        let drop = text_drop("hello").with_tags(["greeting"]);

        store.put(&drop).unwrap();

        let loaded = store.get(&drop.id).unwrap().unwrap();
        assert_eq!(loaded, drop);
    }

    #[test]
    fn test_get_missing() {
        let (store, _temp) = create_test_store();
        assert!(store.get(&DropId::new()).unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_by_id() {
        let (store, _temp) = create_test_store();
        let mut drop = text_drop("first");
        store.put(&drop).unwrap();

        drop.content = "second".into();
        store.put(&drop).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get(&drop.id).unwrap().unwrap().content, "second");
    }

    #[test]
    fn test_delete() {
        let (store, _temp) = create_test_store();
        let drop = text_drop("bye");
        store.put(&drop).unwrap();

        assert!(store.delete(&drop.id).unwrap());
        assert!(store.get(&drop.id).unwrap().is_none());
        assert!(!store.delete(&drop.id).unwrap());
    }

    #[test]
    fn test_get_all_and_delete_unchanged() {
        let (store, _temp) = create_test_store();
        for i in 0..5 {
            store.put(&text_drop(&format!("drop {i}"))).unwrap();
        }

        let snapshot = store.get_all().unwrap();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(store.delete_unchanged(&snapshot).unwrap(), 5);
        assert!(store.is_empty().unwrap());
        assert_eq!(store.delete_unchanged(&snapshot).unwrap(), 0);
    }

    #[test]
    fn test_delete_unchanged_keeps_newer_writes() {
        let (store, _temp) = create_test_store();
        let kept = text_drop("edited later");
        let gone = text_drop("untouched");
        store.put(&kept).unwrap();
        store.put(&gone).unwrap();
        let snapshot = store.get_all().unwrap();

        let mut edited = kept.clone();
        edited.deleted_at = Some(99);
        store.put(&edited).unwrap();
        let late = text_drop("written after snapshot");
        store.put(&late).unwrap();

        assert_eq!(store.delete_unchanged(&snapshot).unwrap(), 1);
        assert!(store.get(&gone.id).unwrap().is_none());
        assert_eq!(store.get(&kept.id).unwrap(), Some(edited));
        assert_eq!(store.get(&late.id).unwrap(), Some(late));
    }

    #[test]
    fn test_drops_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let drop = text_drop("durable");

        {
            let store = LocalStore::open(&db_path).unwrap();
            store.put(&drop).unwrap();
        }

        let store = LocalStore::open(&db_path).unwrap();
        assert_eq!(store.get(&drop.id).unwrap().unwrap().content, "durable");
    }

    #[tokio::test]
    async fn test_lazy_store_shares_one_handle() {
        let temp_dir = TempDir::new().unwrap();
        let lazy = LazyLocalStore::new(temp_dir.path().join("lazy.redb"));

        let (a, b) = tokio::join!(lazy.get(), lazy.get());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a.db_handle(), &b.db_handle()));
    }

    #[tokio::test]
    async fn test_lazy_store_failure_is_sticky() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the database file should be makes open fail.
        let bad_path = temp_dir.path().join("occupied");
        std::fs::create_dir_all(&bad_path).unwrap();
        let lazy = LazyLocalStore::new(&bad_path);

        let first = lazy.get().await.err().unwrap();
        assert!(matches!(first, SyncError::LocalUnavailable(_)));

        std::fs::remove_dir(&bad_path).unwrap();
        let second = lazy.get().await.err().unwrap();
        assert!(matches!(second, SyncError::LocalUnavailable(_)));
    }
}
