//! Remote store adapter
//!
//! Maps drops onto the backend's relational `drops` table and back, issues
//! CRUD against one owner's partition of it, and exposes the table's change
//! feed as a bare "something changed" trigger.
//!
//! ## Row shape
//!
//! ```text
//! Drop (local)          drops (remote)
//! ─────────────────     ──────────────────────────────
//! id                    id               text, primary key
//! content               content          text
//! type                  type             text
//! collectionId          collection_id    text
//! tags                  tags             text[]
//! metadata              metadata         jsonb, nullable
//! createdAt (ms)        created_at       timestamptz
//! deletedAt (ms)        deleted_at       timestamptz, nullable
//! sourceDeviceId        source_device_id uuid, fk devices.id
//! ownerId               user_id          uuid
//! ```
//!
//! Conflicts across devices are resolved by the backend's own write order:
//! the last write to a row wins. Nothing here merges.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{SyncError, SyncResult};
use crate::types::{CollectionId, Drop, DropId, DropMetadata, DropType};

mod memory;
mod rest;

pub use memory::MemoryRemote;
pub use rest::RestRemote;

/// Callback fired for every remote table mutation
pub type ChangeHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Operations the orchestrator needs from a remote backend.
///
/// Every drop operation is scoped to `owner_id`'s partition.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the owner's drops, newest first.
    ///
    /// `collection = None` drops the collection predicate. `trashed` picks
    /// the tombstoned or the active partition.
    async fn list(
        &self,
        owner_id: &str,
        collection: Option<CollectionId>,
        trashed: bool,
    ) -> SyncResult<Vec<Drop>>;

    /// Insert a drop, or overwrite the row with the same id.
    async fn insert(&self, drop: &Drop, owner_id: &str, device_id: &str) -> SyncResult<()>;

    /// Insert many drops in a single request that either fully succeeds or
    /// fully fails.
    async fn insert_many(&self, drops: &[Drop], owner_id: &str, device_id: &str) -> SyncResult<()>;

    /// Set the tombstone.
    async fn soft_delete(&self, owner_id: &str, id: &DropId, deleted_at: i64) -> SyncResult<()>;

    /// Clear the tombstone.
    async fn restore(&self, owner_id: &str, id: &DropId) -> SyncResult<()>;

    /// Remove the row. Removing a missing row is not an error.
    async fn hard_delete(&self, owner_id: &str, id: &DropId) -> SyncResult<()>;

    /// Change the collection of a drop.
    async fn move_to(&self, owner_id: &str, id: &DropId, collection: CollectionId) -> SyncResult<()>;

    /// Run `on_change` for every mutation visible to `owner_id`.
    ///
    /// The handler carries no payload; callers re-list. The feed stops when
    /// the returned task is aborted.
    fn watch(&self, owner_id: &str, on_change: ChangeHandler) -> JoinHandle<()>;

    /// Find the owner's row for this device, creating it if missing, and
    /// return its remote id.
    async fn ensure_device(&self, owner_id: &str, device_key: &str, label: &str) -> SyncResult<String>;
}

/// A drop as stored in the remote `drops` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRow {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub drop_type: DropType,
    pub collection_id: CollectionId,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<DropMetadata>,
    pub source_device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DropRow {
    /// Build the row for `drop`, stamped with its owner and origin device.
    pub fn from_drop(drop: &Drop, owner_id: &str, device_id: &str) -> SyncResult<Self> {
        Ok(Self {
            id: drop.id.as_str().to_string(),
            content: drop.content.clone(),
            drop_type: drop.drop_type,
            collection_id: drop.collection_id,
            tags: drop.tags.clone(),
            user_id: Some(owner_id.to_string()),
            metadata: drop.metadata.clone(),
            source_device_id: Some(device_id.to_string()),
            created_at: millis_to_timestamp(drop.created_at)?,
            deleted_at: drop.deleted_at.map(millis_to_timestamp).transpose()?,
        })
    }

    pub fn into_drop(self) -> Drop {
        Drop {
            id: DropId::from_string(self.id),
            content: self.content,
            drop_type: self.drop_type,
            collection_id: self.collection_id,
            tags: self.tags,
            created_at: self.created_at.timestamp_millis(),
            metadata: self.metadata,
            deleted_at: self.deleted_at.map(|t| t.timestamp_millis()),
            source_device_id: self.source_device_id,
            owner_id: self.user_id,
        }
    }
}

/// A row of the remote `devices` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: String,
    pub user_id: String,
    /// Locally generated device id
    pub device_key: String,
    pub name: String,
}

pub(crate) fn millis_to_timestamp(ms: i64) -> SyncResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| SyncError::Serialization(format!("timestamp out of range: {ms}")))
}
