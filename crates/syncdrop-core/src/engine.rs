//! Main SyncDrop engine - the single choke point between producers and storage
//!
//! SyncDrop decides, per call, which backend a drop operation runs against:
//! - Signed out: the on-device [`LocalStore`], with every write announced to
//!   the other contexts on the device
//! - Signed in: the owner's partition of the [`RemoteStore`]
//!
//! After every mutation, remote push, or refresh signal from another context
//! each subscriber is re-resolved against *its own* view and notified.
//!
//! # Example
//!
//! ```ignore
//! use syncdrop_core::{CollectionFilter, Drop, DropType, CollectionId, SyncConfig, SyncDrop};
//!
//! let engine = SyncDrop::open(SyncConfig::default()).await?;
//!
//! let _inbox = engine
//!     .subscribe(CollectionFilter::Collection(CollectionId::Inbox), |drops| {
//!         println!("{} drops", drops.len());
//!     })
//!     .await;
//!
//! engine.add_drop(Drop::new("hello", DropType::Text, CollectionId::Inbox)).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthProvider, AuthState, Principal, SessionAuth};
use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::device::{DeviceId, DeviceIdentity};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::notifier::{ChannelHub, Notifier};
use crate::remote::{RemoteStore, RestRemote};
use crate::storage::{LazyLocalStore, LocalStore};
use crate::types::{now_millis, CollectionId, Drop, DropId, ViewFilter};

/// Callback receiving the resolved record set of a view
pub type DropsCallback = Arc<dyn Fn(&[Drop]) + Send + Sync + 'static>;

struct Subscriber {
    view: ViewFilter,
    callback: DropsCallback,
    /// Last set delivered, used as the base for optimistic updates
    last: Vec<Drop>,
}

struct Inner {
    local: Arc<LazyLocalStore>,
    notifier: Notifier,
    auth: Arc<dyn AuthProvider>,
    remote: Option<Arc<dyn RemoteStore>>,
    device_label: String,
    device: OnceCell<DeviceIdentity>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    event_tx: broadcast::Sender<SyncEvent>,
    /// Serializes guest migrations so a second run sees the cleared store
    migration_lock: tokio::sync::Mutex<()>,
    migrate_on_sign_in: bool,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    remote_watch: Mutex<Option<(String, JoinHandle<()>)>>,
}

impl Inner {
    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some((_, watch)) = self.remote_watch.lock().take() {
            watch.abort();
        }
    }
}

impl std::ops::Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Builder for a [`SyncDrop`] context
pub struct SyncDropBuilder {
    config: SyncConfig,
    hub: Option<ChannelHub>,
    local: Option<Arc<LazyLocalStore>>,
    auth: Option<Arc<dyn AuthProvider>>,
    remote: Option<Arc<dyn RemoteStore>>,
    migrate_on_sign_in: bool,
}

impl SyncDropBuilder {
    /// Channel hub shared with the other contexts of this device
    pub fn hub(mut self, hub: ChannelHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Local store shared with the other contexts of this device
    pub fn local_store(mut self, local: Arc<LazyLocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Remote backend; overrides `config.remote`
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Whether signing in migrates guest drops automatically (default: yes).
    ///
    /// A context that never migrates and stays signed in does not open the
    /// local store at all.
    pub fn migrate_on_sign_in(mut self, migrate: bool) -> Self {
        self.migrate_on_sign_in = migrate;
        self
    }

    /// Assemble the context. Nothing is opened until first use.
    pub fn build(self) -> SyncResult<SyncDrop> {
        let remote = match (self.remote, &self.config.remote) {
            (Some(remote), _) => Some(remote),
            (None, Some(config)) => {
                Some(Arc::new(RestRemote::new(config.clone())?) as Arc<dyn RemoteStore>)
            }
            (None, None) => None,
        };
        let local = self
            .local
            .unwrap_or_else(|| Arc::new(LazyLocalStore::new(self.config.database_path())));
        let notifier = self
            .hub
            .unwrap_or_default()
            .open(&self.config.channel_name);
        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(SessionAuth::new()) as Arc<dyn AuthProvider>);
        let (event_tx, _) = broadcast::channel(self.config.event_capacity.max(1));

        Ok(SyncDrop {
            inner: Arc::new(Inner {
                local,
                notifier,
                auth,
                remote,
                device_label: self.config.device_label,
                device: OnceCell::new(),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                event_tx,
                migration_lock: tokio::sync::Mutex::new(()),
                migrate_on_sign_in: self.migrate_on_sign_in,
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                remote_watch: Mutex::new(None),
            }),
        })
    }
}

/// Handle returned by [`SyncDrop::subscribe`].
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes exactly
/// this subscriber.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl std::ops::Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().remove(&self.id);
        }
    }
}

/// Local-first drop store with optional remote sync
///
/// Cheap to clone; all clones share one context. Background listeners hold
/// only weak references, so dropping the last clone tears everything down.
#[derive(Clone)]
pub struct SyncDrop {
    inner: Arc<Inner>,
}

impl SyncDrop {
    pub fn builder(config: SyncConfig) -> SyncDropBuilder {
        SyncDropBuilder {
            config,
            hub: None,
            local: None,
            auth: None,
            remote: None,
            migrate_on_sign_in: true,
        }
    }

    /// Build a context from `config` and start its listeners.
    pub async fn open(config: SyncConfig) -> SyncResult<Self> {
        let engine = Self::builder(config).build()?;
        engine.start();
        Ok(engine)
    }

    /// Start the cross-context and auth listeners. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let cross_context = self.inner.notifier.on_refresh(move || {
            debug!("Refresh signal from another context");
            spawn_refresh(&weak);
        });
        let auth_listener = self.spawn_auth_listener();

        self.inner
            .tasks
            .lock()
            .extend([cross_context, auth_listener]);
        info!(context = %self.inner.notifier.context(), "SyncDrop started");
    }

    /// Stop every background listener. Subscribers are kept.
    pub fn shutdown(&self) {
        self.inner.abort_tasks();
        self.inner.started.store(false, Ordering::SeqCst);
        info!("SyncDrop stopped");
    }

    /// Receiver for [`SyncEvent`]s
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ═══════════════════════════════════════════════════════════════════════

    /// Register `callback` for `view` and call it once with the current set.
    ///
    /// Each subscriber keeps its own view: later refreshes re-resolve every
    /// subscriber against the view it asked for.
    pub async fn subscribe<F>(&self, view: impl Into<ViewFilter>, callback: F) -> Subscription
    where
        F: Fn(&[Drop]) + Send + Sync + 'static,
    {
        let view = view.into();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().insert(
            id,
            Subscriber {
                view: view.clone(),
                callback: Arc::new(callback),
                last: Vec::new(),
            },
        );
        debug!(subscriber = id, view = %view.collection, "Subscribed");

        let drops = self.resolve_or_empty(&view).await;
        self.deliver(id, drops);

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Resolve `view` against the active backend.
    pub async fn list(&self, view: impl Into<ViewFilter>) -> SyncResult<Vec<Drop>> {
        let view = view.into();
        self.backend().await?.list(&view).await
    }

    /// Re-resolve every subscriber and notify it.
    ///
    /// A failed listing is delivered as an empty set and reported on the
    /// event channel.
    pub async fn refresh(&self) {
        let views: Vec<(u64, ViewFilter)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(id, sub)| (*id, sub.view.clone()))
            .collect();

        for (id, view) in &views {
            let drops = self.resolve_or_empty(view).await;
            self.deliver(*id, drops);
        }

        self.emit(SyncEvent::Refreshed {
            subscribers: views.len(),
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a new drop. The id is assigned by the caller, so adding the
    /// same drop twice overwrites.
    ///
    /// Subscribers whose view contains the drop see it immediately; once the
    /// write settles every subscriber is re-resolved, which removes the
    /// optimistic record again if the write failed.
    pub async fn add_drop(&self, drop: Drop) -> SyncResult<()> {
        self.apply_optimistic(&drop);

        let result = match self.backend().await {
            Ok(backend) => {
                debug!(drop_id = %drop.id, backend = backend.name(), "Adding drop");
                backend.insert(&drop, move || self.device()).await
            }
            Err(e) => Err(e),
        };
        self.settle("add", result).await
    }

    /// Move a drop to the trash.
    pub async fn remove_drop(&self, id: &DropId) -> SyncResult<()> {
        let result = match self.backend().await {
            Ok(backend) => backend.soft_delete(id, now_millis()).await,
            Err(e) => Err(e),
        };
        self.settle("remove", result).await
    }

    /// Bring a drop back from the trash. Restoring an active drop is a no-op.
    pub async fn restore_drop(&self, id: &DropId) -> SyncResult<()> {
        let result = match self.backend().await {
            Ok(backend) => backend.restore(id).await,
            Err(e) => Err(e),
        };
        self.settle("restore", result).await
    }

    /// Erase a drop for good. Deleting a missing drop is a no-op.
    pub async fn permanently_delete(&self, id: &DropId) -> SyncResult<()> {
        let result = match self.backend().await {
            Ok(backend) => backend.hard_delete(id).await,
            Err(e) => Err(e),
        };
        self.settle("delete", result).await
    }

    /// Move a drop to another collection.
    pub async fn move_drop(&self, id: &DropId, collection: CollectionId) -> SyncResult<()> {
        let result = match self.backend().await {
            Ok(backend) => backend.move_to(id, collection).await,
            Err(e) => Err(e),
        };
        self.settle("move", result).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Guest Data
    // ═══════════════════════════════════════════════════════════════════════

    /// Copy every guest drop into the signed-in owner's remote partition and
    /// then remove the copied drops from the local store.
    ///
    /// Local records are removed only after the bulk insert succeeded, and
    /// only if they still match what was uploaded; on failure nothing local
    /// is touched. Returns the number of drops moved;
    /// an empty local store, or a context without a remote, moves nothing.
    pub async fn migrate_guest_data(&self) -> SyncResult<usize> {
        let Some(principal) = self.inner.auth.current_principal() else {
            return Err(SyncError::InvalidOperation(
                "guest migration requires a signed-in principal".to_string(),
            ));
        };
        let Some(remote) = self.inner.remote.as_deref() else {
            debug!("No remote configured, skipping guest migration");
            return Ok(0);
        };

        let _guard = self.inner.migration_lock.lock().await;
        let local = self.inner.local.get().await?;
        let drops = local.get_all()?;
        if drops.is_empty() {
            return Ok(0);
        }

        let device = self.device().await?;
        let device_id = device
            .remote_id(remote, &principal.id)
            .await
            .map_err(|e| SyncError::Migration(e.to_string()))?;
        remote
            .insert_many(&drops, &principal.id, &device_id)
            .await
            .map_err(|e| SyncError::Migration(e.to_string()))?;

        // Only the uploaded records go; anything written or edited meanwhile
        // stays for the next migration.
        let removed = local.delete_unchanged(&drops)?;
        self.inner.notifier.broadcast();
        info!(
            owner = %principal.id,
            count = drops.len(),
            kept = drops.len() - removed,
            "Migrated guest drops"
        );

        self.emit(SyncEvent::Migrated {
            owner_id: principal.id.clone(),
            count: drops.len(),
        });
        self.refresh().await;
        Ok(drops.len())
    }

    /// Remember that the user chose to continue without an account.
    pub async fn set_guest(&self, guest: bool) -> SyncResult<()> {
        self.inner.local.get().await?.set_guest(guest)
    }

    pub async fn auth_state(&self) -> SyncResult<AuthState> {
        let principal = self.inner.auth.current_principal();
        let guest = match principal {
            Some(_) => false,
            None => self.inner.local.get().await?.is_guest()?,
        };
        Ok(AuthState::resolve(principal, guest))
    }

    /// This device's stable id
    pub async fn device_id(&self) -> SyncResult<DeviceId> {
        Ok(self.device().await?.local_id().clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn local(&self) -> SyncResult<&LocalStore> {
        self.inner.local.get().await
    }

    async fn device(&self) -> SyncResult<&DeviceIdentity> {
        self.inner
            .device
            .get_or_try_init(|| async {
                let store = self.local().await?;
                let id = DeviceId::load_or_create(store)?;
                Ok::<_, SyncError>(DeviceIdentity::new(id, &self.inner.device_label))
            })
            .await
    }

    /// Pick the backend for one call.
    async fn backend(&self) -> SyncResult<Backend<'_>> {
        match (self.inner.auth.current_principal(), self.inner.remote.as_deref()) {
            (Some(principal), Some(remote)) => Ok(Backend::Remote {
                store: remote,
                owner: principal.id,
            }),
            _ => Ok(Backend::Local {
                store: self.local().await?,
                notifier: &self.inner.notifier,
            }),
        }
    }

    async fn resolve_or_empty(&self, view: &ViewFilter) -> Vec<Drop> {
        match self.list(view.clone()).await {
            Ok(drops) => drops,
            Err(e) => {
                warn!(view = %view.collection, error = %e, "Listing failed, showing nothing");
                self.emit(SyncEvent::error(e.read_kind(), &e));
                Vec::new()
            }
        }
    }

    /// Refresh after a mutation and pass its result through.
    async fn settle(&self, op: &'static str, result: SyncResult<()>) -> SyncResult<()> {
        if let Err(e) = &result {
            warn!(op, error = %e, "Mutation failed");
            self.emit(SyncEvent::error(e.kind(), e));
        }
        self.refresh().await;
        result
    }

    fn apply_optimistic(&self, drop: &Drop) {
        let pending: Vec<(u64, Vec<Drop>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|(_, sub)| sub.view.matches(drop))
            .map(|(id, sub)| {
                let others = sub.last.iter().filter(|d| d.id != drop.id).cloned();
                let drops = sub.view.resolve(others.chain(std::iter::once(drop.clone())));
                (*id, drops)
            })
            .collect();

        for (id, drops) in pending {
            self.deliver(id, drops);
        }
    }

    fn deliver(&self, id: u64, drops: Vec<Drop>) {
        let callback = {
            let mut subscribers = self.inner.subscribers.lock();
            let Some(sub) = subscribers.get_mut(&id) else {
                return;
            };
            sub.last = drops.clone();
            sub.callback.clone()
        };
        callback(&drops);
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn watch_remote(&self, owner_id: &str) {
        let Some(remote) = &self.inner.remote else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = remote.watch(
            owner_id,
            Box::new(move || {
                debug!("Remote change");
                spawn_refresh(&weak);
            }),
        );
        if let Some((_, previous)) = self
            .inner
            .remote_watch
            .lock()
            .replace((owner_id.to_string(), handle))
        {
            previous.abort();
        }
    }

    fn stop_remote_watch(&self) {
        if let Some((owner, watch)) = self.inner.remote_watch.lock().take() {
            debug!(owner = %owner, "Stopped remote watch");
            watch.abort();
        }
    }

    async fn on_auth_change(&self, previous: Option<&Principal>, current: Option<&Principal>) {
        let switched = previous.map(|p| &p.id) != current.map(|p| &p.id);

        match current {
            Some(principal) if switched => {
                self.watch_remote(&principal.id);
                if !self.inner.migrate_on_sign_in {
                    debug!("Automatic guest migration disabled");
                } else if let Err(e) = self.migrate_guest_data().await {
                    warn!(error = %e, "Guest migration failed, keeping local data");
                    self.emit(SyncEvent::error(ErrorKind::Migration, &e));
                }
            }
            Some(_) => {}
            None => {
                self.stop_remote_watch();
                if previous.is_some() {
                    if let Err(e) = self.set_guest(false).await {
                        warn!(error = %e, "Could not clear guest flag");
                    }
                }
            }
        }

        if switched {
            self.emit(SyncEvent::AuthChanged {
                owner_id: current.map(|p| p.id.clone()),
            });
        }
        self.refresh().await;
    }

    fn spawn_auth_listener(&self) -> JoinHandle<()> {
        let mut rx = self.inner.auth.watch();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut previous: Option<Principal> = None;
            loop {
                let current = rx.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncDrop { inner }
                    .on_auth_change(previous.as_ref(), current.as_ref())
                    .await;
                previous = current;

                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

fn spawn_refresh(weak: &Weak<Inner>) {
    if let Some(inner) = weak.upgrade() {
        tokio::spawn(async move {
            SyncDrop { inner }.refresh().await;
        });
    }
}
