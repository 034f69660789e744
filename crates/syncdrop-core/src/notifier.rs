//! Cross-context "data changed" signalling.
//!
//! Every execution context in one process (tab, window, engine clone built
//! on the same hub) that opens the same named channel on a [`ChannelHub`]
//! hears the refresh signals of the others. A context never hears its own
//! signal. Separate processes do not share a hub.
//!
//! ```text
//! ┌────────────┐  broadcast()   ┌──────────────────────┐  on_refresh   ┌────────────┐
//! │ context A  │ ─────────────▶ │ hub["syncdrop_..."]  │ ────────────▶ │ context B  │
//! └────────────┘                └──────────────────────┘               └────────────┘
//! ```
//!
//! Delivery is fire-and-forget and at most once per message. A listener that
//! falls behind collapses the missed signals into a single refresh.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use ulid::Ulid;

/// Default channel name shared by all contexts of one device
pub const DEFAULT_CHANNEL_NAME: &str = "syncdrop_realtime";

const CHANNEL_CAPACITY: usize = 64;

/// Identifies one execution context on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Ulid);

impl ContextId {
    fn new() -> Self {
        Self(Ulid::new())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx_{}", self.0)
    }
}

/// The opaque refresh message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSignal {
    pub origin: ContextId,
}

/// Registry of named broadcast channels shared by every context on a device
#[derive(Clone, Default)]
pub struct ChannelHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<RefreshSignal>>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the named channel as a new context.
    pub fn open(&self, name: &str) -> Notifier {
        let sender = self
            .channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();

        let context = ContextId::new();
        debug!(channel = name, %context, "Joined refresh channel");
        Notifier { context, sender }
    }
}

/// One context's handle on a refresh channel
#[derive(Clone)]
pub struct Notifier {
    context: ContextId,
    sender: broadcast::Sender<RefreshSignal>,
}

impl Notifier {
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Tell every other context that the data changed.
    ///
    /// Having no listeners is not an error.
    pub fn broadcast(&self) {
        let receivers = self
            .sender
            .send(RefreshSignal {
                origin: self.context,
            })
            .unwrap_or(0);
        trace!(context = %self.context, receivers, "Broadcast refresh");
    }

    /// Run `handler` whenever another context broadcasts.
    ///
    /// The listener task lives until the returned handle is aborted or every
    /// sender on the channel is gone.
    pub fn on_refresh<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        let mut rx = self.sender.subscribe();
        let own = self.context;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) if signal.origin == own => continue,
                    Ok(_) => handler(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Refresh listener lagged, refreshing once");
                        handler();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
