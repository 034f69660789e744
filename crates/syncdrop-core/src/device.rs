//! Device identity
//!
//! Every browser profile / install gets one random id, generated on first
//! use and kept for the lifetime of the local store. Remote writes are
//! tagged with the id of the matching row in the remote `devices` table,
//! which is looked up (or created) once per owner and then cached.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Maximum length of the human-readable label sent to the remote
pub const MAX_LABEL_LEN: usize = 50;

/// Stable per-device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Load the device id from `store`, generating and persisting one if
    /// this device has never had one.
    ///
    /// A stored value that is not a UUID is replaced. Contexts racing on the
    /// same store all end up with the id that was persisted first.
    pub fn load_or_create(store: &LocalStore) -> SyncResult<Self> {
        let candidate = Self::new();
        let stored = store.device_id_or_insert(&candidate.to_string(), |s| {
            Uuid::parse_str(s).is_ok()
        })?;
        let id = Uuid::parse_str(&stored)
            .map(Self)
            .map_err(|e| SyncError::Storage(format!("invalid device id {stored}: {e}")))?;

        if id == candidate {
            info!(device_id = %id, "Generated new device id");
        }
        Ok(id)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// This device's local id plus the remote device-row ids resolved so far.
pub struct DeviceIdentity {
    local: DeviceId,
    label: String,
    remote_ids: Mutex<HashMap<String, String>>,
}

impl DeviceIdentity {
    pub fn new(local: DeviceId, label: impl AsRef<str>) -> Self {
        Self {
            local,
            label: truncate_label(label.as_ref()),
            remote_ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &DeviceId {
        &self.local
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Remote device id for `owner_id`, registering this device on first use.
    pub async fn remote_id(&self, remote: &dyn RemoteStore, owner_id: &str) -> SyncResult<String> {
        let cached = self.remote_ids.lock().get(owner_id).cloned();
        if let Some(id) = cached {
            return Ok(id);
        }

        let id = remote
            .ensure_device(owner_id, &self.local.to_string(), &self.label)
            .await?;
        self.remote_ids
            .lock()
            .insert(owner_id.to_string(), id.clone());
        Ok(id)
    }
}

/// Descriptor of this client, e.g. `SyncDrop/0.1.0 (linux; x86_64)`
pub fn default_device_label() -> String {
    truncate_label(&format!(
        "SyncDrop/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    ))
}

fn truncate_label(label: &str) -> String {
    label.chars().take(MAX_LABEL_LEN).collect()
}
