//! The storage a single call runs against.
//!
//! [`crate::SyncDrop`] picks one [`Backend`] at the top of every operation,
//! based on whether a principal is signed in, and then only talks to the
//! variant through the same handful of methods.

use std::future::Future;

use tracing::debug;

use crate::device::DeviceIdentity;
use crate::error::SyncResult;
use crate::notifier::Notifier;
use crate::remote::RemoteStore;
use crate::storage::LocalStore;
use crate::types::{CollectionId, Drop, DropId, ViewFilter};

pub(crate) enum Backend<'a> {
    /// Guest data on this device; writes are announced to other contexts
    Local {
        store: &'a LocalStore,
        notifier: &'a Notifier,
    },
    /// The signed-in owner's partition of the remote table
    Remote {
        store: &'a dyn RemoteStore,
        owner: String,
    },
}

impl Backend<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Local { .. } => "local",
            Backend::Remote { .. } => "remote",
        }
    }

    /// Resolve the record set for one view, newest first.
    pub async fn list(&self, view: &ViewFilter) -> SyncResult<Vec<Drop>> {
        let drops = match self {
            Backend::Local { store, .. } => store.get_all()?,
            Backend::Remote { store, owner } => {
                store
                    .list(owner, view.collection.collection(), view.collection.trashed())
                    .await?
            }
        };
        Ok(view.resolve(drops))
    }

    /// Store `drop`. `device` is only awaited for remote rows, which carry
    /// the id of the device that wrote them.
    pub async fn insert<'d, F, Fut>(&self, drop: &Drop, device: F) -> SyncResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<&'d DeviceIdentity>>,
    {
        match self {
            Backend::Local { store, notifier } => {
                store.put(drop)?;
                notifier.broadcast();
                Ok(())
            }
            Backend::Remote { store, owner } => {
                let device_id = device().await?.remote_id(*store, owner).await?;
                store.insert(drop, owner, &device_id).await
            }
        }
    }

    pub async fn soft_delete(&self, id: &DropId, deleted_at: i64) -> SyncResult<()> {
        match self {
            Backend::Local { store, notifier } => update_local(store, notifier, id, |drop| {
                drop.deleted_at = Some(deleted_at);
                true
            }),
            Backend::Remote { store, owner } => store.soft_delete(owner, id, deleted_at).await,
        }
    }

    pub async fn restore(&self, id: &DropId) -> SyncResult<()> {
        match self {
            Backend::Local { store, notifier } => {
                update_local(store, notifier, id, |drop| drop.deleted_at.take().is_some())
            }
            Backend::Remote { store, owner } => store.restore(owner, id).await,
        }
    }

    pub async fn hard_delete(&self, id: &DropId) -> SyncResult<()> {
        match self {
            Backend::Local { store, notifier } => {
                if store.delete(id)? {
                    notifier.broadcast();
                }
                Ok(())
            }
            Backend::Remote { store, owner } => store.hard_delete(owner, id).await,
        }
    }

    pub async fn move_to(&self, id: &DropId, collection: CollectionId) -> SyncResult<()> {
        match self {
            Backend::Local { store, notifier } => update_local(store, notifier, id, |drop| {
                let changed = drop.collection_id != collection;
                drop.collection_id = collection;
                changed
            }),
            Backend::Remote { store, owner } => store.move_to(owner, id, collection).await,
        }
    }
}

/// Read-modify-write one local record. `f` returns whether it changed
/// anything; unchanged or missing records are not rewritten.
fn update_local<F>(store: &LocalStore, notifier: &Notifier, id: &DropId, f: F) -> SyncResult<()>
where
    F: FnOnce(&mut Drop) -> bool,
{
    let Some(mut drop) = store.get(id)? else {
        debug!(drop_id = %id, "Local update skipped, drop not found");
        return Ok(());
    };
    if f(&mut drop) {
        store.put(&drop)?;
        notifier.broadcast();
    }
    Ok(())
}
